fn main() {
    // The ESP-IDF environment only matters for the device build; host
    // builds (tests, fuzzing) run without it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
