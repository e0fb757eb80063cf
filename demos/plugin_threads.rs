//! Example running every plugin in `demos/plugins` on its own thread.
//!
//! Each plugin receives its number as the `initialize` argument and the same
//! number as text as the `step` argument.

use std::time::Duration;

use rhai_plugin_runtime::{
    ContextConfig, HostValue, LoaderConfig, LockMode, PluginRuntime, RuntimeConfig,
    SchedulerConfig,
};

fn main() -> rhai_plugin_runtime::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let parallel = std::env::args().any(|arg| arg == "--parallel");
    let plugin_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/plugins");

    let config = RuntimeConfig::new()
        .with_plugin_dir(&plugin_dir)
        .with_auto_discover(true)
        .with_loader(LoaderConfig::new().with_context(ContextConfig::new().with_echo_output(true)))
        .with_scheduler(SchedulerConfig::new().with_lock_mode(if parallel {
            LockMode::Parallel
        } else {
            LockMode::Exclusive
        }));

    println!("=== Plugin Threads Example ===\n");

    let runtime = PluginRuntime::new(config)?;
    runtime.on_event(|event| {
        println!("[event] {} {}", event.plugin_name(), event.event_name());
    });

    println!("Discovered {} plugin(s) in {}", runtime.plugin_count(), plugin_dir.display());
    for info in runtime.registry().info() {
        println!("  {} ({})", info.name, info.state);
    }

    for (name, result) in runtime.start_all(|index, _| {
        (HostValue::from(index as i64), HostValue::from(index.to_string()))
    }) {
        if let Err(e) = result {
            eprintln!("Failed to start {}: {}", name, e);
        }
    }

    std::thread::sleep(Duration::from_secs(5));

    println!("\n=== Shutting down ===");
    for report in runtime.shutdown() {
        println!(
            "  {}: {} after {} step(s){}",
            report.plugin,
            report.state,
            report.steps,
            report
                .failure
                .map(|f| format!(", {}", f))
                .unwrap_or_default()
        );
    }

    let stats = runtime.lock_stats();
    println!(
        "\nExecution lock: {} acquisitions, {} contended",
        stats.acquisitions, stats.contended
    );

    Ok(())
}
