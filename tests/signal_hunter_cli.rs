use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn signal_hunter_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_signal-hunter").expect("signal-hunter test binary not built")
}

#[test]
fn help_mentions_name() {
    let output = Command::new(signal_hunter_bin())
        .arg("--help")
        .output()
        .expect("run signal-hunter --help");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("Signal Hunter"));
}

#[test]
fn list_devices_prints_message() {
    let output = Command::new(signal_hunter_bin())
        .arg("--list-devices")
        .output()
        .expect("run signal-hunter --list-devices");
    let combined = combined_output(&output);
    assert!(
        combined.contains("audio devices") || combined.contains("Failed to list audio devices"),
        "{combined}"
    );
}

#[test]
fn invalid_fft_size_is_rejected() {
    let output = Command::new(signal_hunter_bin())
        .args(["--fft-size", "3000", "--list-devices"])
        .output()
        .expect("run signal-hunter --fft-size 3000");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("fft size"));
}
