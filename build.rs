use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=settings.json");

    // target/<profile>/build/<pkg>/out -> target/<profile>, next to the binary
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .expect("OUT_DIR is nested under the target dir");

    fs::copy("settings.json", target_dir.join("settings.json"))
        .expect("Failed to copy settings.json");
}
