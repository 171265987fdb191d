#![no_main]
use libfuzzer_sys::fuzz_target;

// Arbitrary TOML must be rejected with an error, never a panic. Configs that
// pass validation must describe eight chambers with sixteen distinct pins.
fuzz_target!(|data: &str| {
    let Ok(cfg) = perfusion_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        let mut pins: Vec<u8> = cfg
            .pins
            .chambers
            .iter()
            .flat_map(|p| [p.add, p.remove])
            .collect();
        pins.sort_unstable();
        pins.dedup();
        assert_eq!(pins.len(), 2 * perfusion_config::CHAMBER_COUNT);
        assert!(cfg.exchange.target_ml > 0.0);
    }
});
