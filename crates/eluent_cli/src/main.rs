//! Smoke binary: prints the core crate's health probe and version so a
//! fresh checkout can confirm the workspace links end to end.

fn main() {
    println!("eluent_core ping={}", eluent_core::ping());
    println!("eluent_core version={}", eluent_core::core_version());
}
