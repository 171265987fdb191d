use perfusion_hardware::SimulatedOutputs;
use perfusion_hardware::error::HwError;
use perfusion_traits::DigitalOutput;
use rstest::rstest;

#[rstest]
#[case(2, true)]
#[case(27, false)]
fn writes_are_visible_through_probe(#[case] pin: u8, #[case] level: bool) {
    let mut out = SimulatedOutputs::new();
    let probe = out.probe();
    out.set(pin, level).expect("write");
    assert_eq!(probe.is_active(pin), level);
}

#[rstest]
fn injected_failure_surfaces_as_gpio_error() {
    let mut out = SimulatedOutputs::new();
    out.fail_writes_to(4);
    let err = out.set(4, true).expect_err("write should fail");
    match err.downcast_ref::<HwError>() {
        Some(HwError::Gpio(msg)) => assert!(msg.contains("pin 4")),
        other => panic!("unexpected error: {other:?}"),
    }
    // other pins are unaffected
    out.set(5, true).expect("write to healthy pin");
}
