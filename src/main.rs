use std::error::Error;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use txxt_client::backend::LocalRemote;
use txxt_client::persist::SaveFile;
use txxt_client::settings::SETTINGS_FILENAME;
use txxt_client::views::{self, Filter, StatusFilter};
use txxt_client::{
    BulkAction, BulkRequest, Level, NewTask, NotificationLog, Priority, RemoteApi, Session, Settings, ShoppingToggle,
    TodoClient, Toggle,
};

/// Owner the demo session signs in as.
const DEMO_OWNER: Uuid = Uuid::from_u128(0x7478_7874_0000_4000_8000_0000_0000_0001);

#[tokio::main]
async fn main() {
    init_tracing();

    // ── Settings ───────────────────────────────────────────────
    let settings = match Settings::load(SETTINGS_FILENAME) {
        Ok(settings) => settings,
        Err(e) => {
            println!("{e}; using defaults");
            Settings::default()
        }
    };

    // ── Boot the World ─────────────────────────────────────────
    let save_file = match SaveFile::open(&settings.save_file) {
        Ok(save_file) => save_file,
        Err(e) => {
            eprintln!("Failed to open save file {}: {e}", settings.save_file);
            std::process::exit(1);
        }
    };
    let world = match save_file.load_world(settings.title_max) {
        Ok(world) => world,
        Err(e) => {
            eprintln!("Failed to load world from save file: {e}");
            std::process::exit(1);
        }
    };
    println!("World loaded: {} tasks, revision {}", world.tasks.len(), world.revision);

    // ── Client ─────────────────────────────────────────────────
    let remote: Arc<dyn RemoteApi> = Arc::new(LocalRemote::new(world, Some(save_file), DEMO_OWNER));
    let log = NotificationLog::default();
    let client = TodoClient::new(remote, Arc::new(log.clone()), settings, Session::signed_in(DEMO_OWNER));

    if let Err(e) = run(&client, &log).await {
        eprintln!("demo session failed: {e}");
        std::process::exit(1);
    }
}

/// A short scripted session touching every mutation.
async fn run(client: &TodoClient, log: &NotificationLog) -> Result<(), Box<dyn Error>> {
    client.refetch().await?;
    let today = Utc::now().date_naive();

    let create = client.create();
    let milk = create.invoke_async(NewTask::titled("Buy milk")).await?;
    let report = create
        .invoke_async(NewTask {
            title: "Write report".into(),
            priority: Some(Priority::High),
            due_date: Some(today),
            ..Default::default()
        })
        .await?;
    let groceries = create
        .invoke_async(NewTask {
            title: "Groceries".into(),
            shopping_items: vec!["eggs".into(), "bread".into()],
            ..Default::default()
        })
        .await?;
    if let Err(e) = create.invoke_async(NewTask::titled("  ")).await {
        println!("  (rejected before dispatch: {e})");
    }
    client.refetch().await?;
    print_notifications(log);

    client.toggle().invoke_async(Toggle { id: milk.id, completed: true }).await?;
    client.reorder().invoke_async(vec![report.id, groceries.id, milk.id]).await?;
    let check = client.toggle_shopping_item();
    for item in groceries.shopping_items() {
        check
            .invoke_async(ShoppingToggle { task_id: groceries.id, item_id: item.id, completed: true })
            .await?;
    }
    client
        .bulk()
        .invoke_async(BulkRequest { ids: vec![milk.id, report.id], action: BulkAction::Incomplete })
        .await?;
    print_notifications(log);

    client.delete().invoke_async(milk.id).await?;
    print_notifications(log);
    client.undo_latest().await;
    print_notifications(log);

    let list = client.refetch().await?;
    println!();
    for task in Filter::default().apply(&list) {
        let mark = if task.completed { "x" } else { " " };
        println!("  [{mark}] {:<24} {:<6} order {}", task.title, task.priority.as_str(), task.order);
    }
    let active = Filter { status: StatusFilter::Active, ..Default::default() }.apply(&list);
    let stats = views::stats(&list, today);
    println!(
        "{} tasks, {} active, {}% done, {} due today, {} overdue",
        stats.total,
        active.len(),
        stats.completion_percent,
        stats.due_today,
        stats.overdue
    );
    Ok(())
}

fn print_notifications(log: &NotificationLog) {
    for note in log.drain() {
        let level = match note.level {
            Level::Success => "ok",
            Level::Error => "error",
            Level::Info => "info",
        };
        match note.undo {
            Some(offer) => println!("{level:>5}: {}  [{}]", note.text, offer.label),
            None => println!("{level:>5}: {}", note.text),
        }
    }
}

#[cfg(feature = "profile-console")]
fn init_tracing() {
    console_subscriber::init();
}

#[cfg(all(feature = "profile", not(feature = "profile-console")))]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txxt_client=debug")))
        .init();
}

#[cfg(not(feature = "profile"))]
fn init_tracing() {}
