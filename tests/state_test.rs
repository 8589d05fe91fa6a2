use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn state_json() -> String {
    r#"{
        "targets": {
            "Sales/Orders": {
                "database": "Sales",
                "layout": "Orders",
                "last_values": {"_Timestamp_Modified": "01/05/2024 12:00:00"},
                "last_sync_at": "2024-01-05T12:00:00Z",
                "last_row_count": 42
            }
        },
        "table_schemas": {"orders": ["Id", "hsh_Timestamp_Modified"]},
        "version": 1,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-05T12:00:00Z"
    }"#
    .to_string()
}

#[test]
fn test_state_command() {
    let temp_dir = tempdir().unwrap();
    let state_file = temp_dir.path().join("state.json");
    let state_arg = state_file.to_str().unwrap();

    let bin_path = env!("CARGO_BIN_EXE_filemaker-extractor");

    // `state show` before any run
    let output = Command::new(bin_path)
        .args(["state", "show", "--state-file", state_arg])
        .output()
        .expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No incremental state recorded."));

    // Seed a state file and show it
    fs::write(&state_file, state_json()).unwrap();
    let output = Command::new(bin_path)
        .args(["state", "show", "--state-file", state_arg])
        .output()
        .expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Sales/Orders: 42 record(s)"));
    assert!(stdout.contains("_Timestamp_Modified"));
    assert!(stdout.contains("table 'orders': 2 column(s)"));

    // Reset one target
    let output = Command::new(bin_path)
        .args([
            "state",
            "reset",
            "--database",
            "Sales",
            "--layout",
            "Orders",
            "--state-file",
            state_arg,
        ])
        .output()
        .expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Cleared state for Sales/Orders."));

    let state_content = fs::read_to_string(&state_file).unwrap();
    assert!(!state_content.contains("Sales/Orders"));

    // Reset everything removes the file
    let output = Command::new(bin_path)
        .args(["state", "reset", "--state-file", state_arg])
        .output()
        .expect("Failed to execute command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Cleared all incremental state."));
    assert!(!state_file.exists());
}

#[test]
fn test_run_rejects_invalid_config_before_any_call() {
    let temp_dir = tempdir().unwrap();
    let config_file = temp_dir.path().join("config.json");
    // object_type "layout" but no layout_name
    fs::write(
        &config_file,
        r#"{
            "connection": {
                "base_url": "https://fms.example.com",
                "username": "api",
                "password": "secret"
            },
            "object_type": "layout",
            "database": "Sales"
        }"#,
    )
    .unwrap();

    let bin_path = env!("CARGO_BIN_EXE_filemaker-extractor");
    let output = Command::new(bin_path)
        .args([
            "run",
            "--config",
            config_file.to_str().unwrap(),
            "--output-dir",
            temp_dir.path().join("out").to_str().unwrap(),
            "--state-file",
            temp_dir.path().join("state.json").to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    // Configuration errors are user errors
    assert_eq!(output.status.code(), Some(1));
}
