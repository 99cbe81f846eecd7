use std::path::Path;

/// Detaches from the terminal. Must run before the tokio runtime exists.
#[cfg(unix)]
pub fn daemonize(pid_file: &Path) -> anyhow::Result<()> {
    use daemonize::Daemonize;

    eprintln!("[INFO] Starting daemon mode...");

    // Relative --out/--logs paths resolve against the launch directory.
    let daemonize = Daemonize::new()
        .pid_file(pid_file)
        .chown_pid_file(true)
        .working_directory(".")
        .umask(0o027);

    match daemonize.start() {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("[ERROR] Daemon startup: {}", e);
            Err(anyhow::anyhow!("Failed to start daemon mode"))
        }
    }
}

#[cfg(not(unix))]
pub fn daemonize(_pid_file: &Path) -> anyhow::Result<()> {
    eprintln!("[INFO] Daemon mode not supported on this platform, staying in foreground");
    Ok(())
}
