use std::fs;
use std::process::Command;

fn shell() -> Command {
    Command::new(env!("CARGO_BIN_EXE_metrics_shell"))
}

#[test]
fn batch_file_runs_until_quit() {
    let dir = tempfile::tempdir().unwrap();
    let batch = dir.path().join("commands.txt");
    let target = dir.path().join("out.txt");
    fs::write(
        &batch,
        format!(
            "echo first\necho second > {}\nquit\necho never\n",
            target.display()
        ),
    )
    .unwrap();

    let output = shell().arg(&batch).current_dir(dir.path()).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("first\n"));
    assert!(!stdout.contains("never"));
    assert_eq!(fs::read_to_string(&target).unwrap(), "second\n");
}

#[test]
fn config_flag_points_at_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("settings.json");
    let batch = dir.path().join("commands.txt");
    fs::write(&config, r#"{"intervalo_muestreo": 2, "metricas": ["cpu_usage"]}"#).unwrap();
    fs::write(&batch, "config print\n").unwrap();

    let output = shell()
        .arg(&batch)
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Sampling interval: 2 seconds"));
    assert!(stdout.contains(" - cpu_usage"));
}

#[test]
fn missing_batch_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = shell().arg(dir.path().join("nope.txt")).output().unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("cannot open"));
}

#[test]
fn redirection_error_goes_to_stderr_and_shell_continues() {
    let dir = tempfile::tempdir().unwrap();
    let batch = dir.path().join("commands.txt");
    fs::write(&batch, "cat < absent.txt\necho after\n").unwrap();

    let output = shell().arg(&batch).current_dir(dir.path()).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("absent.txt: No such file or directory"));
    assert!(!stdout.contains("No such file"));
    assert!(stdout.contains("after\n"));
}
