#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Fuzz TOML parsing of Config: parse and validation errors are fine,
    // panics are not.
    match toml::from_str::<mixer_config::Config>(data) {
        Ok(cfg) => {
            let _ = cfg.validate();
        }
        Err(_e) => {
            // parse error is acceptable
        }
    }
});
