//! Example passing host values into a script and reading results back.

use rhai_plugin_runtime::{Error, HostValue, PluginRuntime};

const SCRIPT: &str = r#"
    let int_global = 12;

    fn describe(v) { `${type_of(v)}: ${v}` }
    fn accept_dict(d, key) { d[key] }
    fn accept_list(items) {
        let out = "";
        for item in items { out += item.to_string() + ","; }
        out
    }
    fn identity(v) { v }
"#;

fn main() -> rhai_plugin_runtime::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Marshalling Example ===\n");

    let runtime = PluginRuntime::default_config()?;
    let plugin = runtime.load_source("marshalling", SCRIPT)?;

    println!("Functions: {:?}", plugin.functions());
    println!("int_global = {}", plugin.global("int_global")?);

    let values: Vec<HostValue> = vec![
        42.into(),
        6.5.into(),
        true.into(),
        "text".into(),
        vec![1, 2, 3].into(),
        [("a", 1), ("b", 2)].into_iter().collect(),
        HostValue::Unit,
    ];

    println!("\n=== Round trips ===");
    for value in &values {
        let described = plugin.call("describe", &[value.clone()])?;
        let back = plugin.call("identity", &[value.clone()])?;
        println!("  {:<24} -> {:<24} ({})", value.to_string(), described.to_string(), back.kind());
    }

    println!("\n=== Collections ===");
    let dict: HostValue = [("a", 1), ("b", 2)].into_iter().collect();
    println!("  accept_dict(a) = {}", plugin.call("accept_dict", &[dict.clone(), "a".into()])?);
    match plugin.call("accept_dict", &[dict, "z".into()]) {
        Err(Error::KeyNotFound(key)) => println!("  accept_dict(z) -> missing key {:?}", key),
        other => println!("  accept_dict(z) -> {:?}", other),
    }
    println!(
        "  accept_list = {}",
        plugin.call("accept_list", &[vec!["x", "y"].into()])?
    );

    println!("\n=== Errors ===");
    for (function, args) in [("missing", vec![]), ("identity", vec![])] {
        match plugin.call(function, &args) {
            Ok(v) => println!("  {} -> {}", function, v),
            Err(e) => println!("  {} -> [{}] {}", function, e.code(), e),
        }
    }

    Ok(())
}
