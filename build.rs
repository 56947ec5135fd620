fn main() {
    // ESP-IDF build environment is only needed for the firmware build (Xtensa or
    // RISC-V espidf targets). Host builds and tests skip it entirely.
    if let Ok(target) = std::env::var("TARGET") {
        if target.ends_with("-espidf") || target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
