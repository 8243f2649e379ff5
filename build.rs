use std::{env, fs, path::PathBuf};

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Make the board memory map (including the DMA-visible AXI SRAM section) visible to the
    // cortex-m-rt linker script.
    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::copy("memory.x", out.join("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");
}
