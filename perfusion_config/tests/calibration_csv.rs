use perfusion_config::{CalibrationRow, FlowCalibration, FlowDirection, load_calibration_csv};
use rstest::rstest;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_csv(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("temp file");
    f.write_all(contents.as_bytes()).expect("write csv");
    f
}

#[test]
fn fits_rate_per_direction() {
    let f = write_csv(
        "direction,seconds,ml\n\
         remove,5.0,30.0\n\
         remove,10.0,60.0\n\
         add,4.0,32.0\n",
    );
    let cal = load_calibration_csv(f.path()).expect("load calibration");
    assert!((cal.remove_ml_per_s - 6.0).abs() < 1e-4);
    assert!((cal.add_ml_per_s - 8.0).abs() < 1e-4);
}

#[test]
fn least_squares_through_origin_weights_longer_runs() {
    let rows = [
        CalibrationRow { direction: FlowDirection::Remove, seconds: 1.0, ml: 10.0 },
        CalibrationRow { direction: FlowDirection::Remove, seconds: 3.0, ml: 15.0 },
        CalibrationRow { direction: FlowDirection::Add, seconds: 2.0, ml: 10.0 },
    ];
    let cal = FlowCalibration::from_rows(&rows).expect("fit");
    // (1*10 + 3*15) / (1 + 9) = 5.5
    assert!((cal.remove_ml_per_s - 5.5).abs() < 1e-4);
    assert!((cal.add_ml_per_s - 5.0).abs() < 1e-4);
}

#[test]
fn tolerates_whitespace_around_fields() {
    let f = write_csv("direction, seconds, ml\nremove, 2.0, 10.0\nadd ,2.0,12.0\n");
    let cal = load_calibration_csv(f.path()).expect("load calibration");
    assert!((cal.add_ml_per_s - 6.0).abs() < 1e-4);
}

#[rstest]
#[case("dir,seconds,ml\nremove,1,1\nadd,1,1\n", "must have headers")]
#[case("direction,seconds,ml\nremove,1,5\n", "no rows for direction Add")]
#[case("direction,seconds,ml\nremove,0,5\nadd,1,1\n", "seconds must be > 0")]
#[case("direction,seconds,ml\nremove,1,-5\nadd,1,1\n", "ml must be >= 0")]
#[case("direction,seconds,ml\nsideways,1,5\nadd,1,1\n", "invalid CSV row 2")]
#[case("direction,seconds,ml\nremove,1,0\nadd,1,1\n", "invalid rate")]
fn rejects_bad_files(#[case] contents: &str, #[case] needle: &str) {
    let f = write_csv(contents);
    let err = load_calibration_csv(f.path()).expect_err("should fail");
    assert!(format!("{err}").contains(needle), "error {err} does not mention {needle}");
}

#[test]
fn missing_file_is_reported_with_path() {
    let err = load_calibration_csv(std::path::Path::new("/nonexistent/flow.csv"))
        .expect_err("missing file");
    assert!(format!("{err}").contains("open calibration CSV"));
}
