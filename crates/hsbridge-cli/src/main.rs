use anyhow::{Context, Result, bail};
use hsbridge::{Bridge, BridgeConfig, convert};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    init_tracing()?;

    let mut args = std::env::args().skip(1);
    let task = args.next();
    let rest: Vec<String> = args.collect();

    if let Some(name) = task.as_deref() {
        let f = TASKS
            .iter()
            .find_map(|(k, f)| (*k == name).then_some(*f))
            .unwrap_or(print_help);
        f(&rest)
    } else {
        print_help(&rest)
    }
}

type Task = fn(&[String]) -> Result<()>;
const TASKS: &[(&str, Task)] = &[
    ("eval", eval),
    ("exec", exec),
    ("type", type_of),
    ("help", print_help),
];

fn init_tracing() -> Result<()> {
    let envfilter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .context("failed to read RUST_LOG")?;

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .with_filter(envfilter),
        )
        .init();
    Ok(())
}

fn connect() -> Result<Bridge> {
    let config = BridgeConfig::from_env()
        .context("invalid HSBRIDGE_* environment")?
        .callbacks(None);
    Bridge::builder()
        .config(config)
        .build()
        .context("failed to reach the Lua runtime")
}

fn code(args: &[String]) -> Result<String> {
    if args.is_empty() {
        bail!("missing Lua code argument");
    }
    Ok(args.join(" "))
}

fn eval(args: &[String]) -> Result<()> {
    let expr = code(args)?;
    let bridge = connect()?;
    let result = bridge
        .eval(&expr)
        .and_then(|proxy| proxy.value())
        .with_context(|| format!("failed to evaluate `{expr}`"));
    bridge.close();
    let value = result?;
    match convert::serialize(&value) {
        Ok(literal) => println!("{literal}"),
        Err(_) => println!("{value}"),
    }
    Ok(())
}

fn exec(args: &[String]) -> Result<()> {
    let snippet = code(args)?;
    let bridge = connect()?;
    let result = bridge.exec(&snippet);
    bridge.close();
    let output = result.context("remote snippet failed")?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn type_of(args: &[String]) -> Result<()> {
    let expr = code(args)?;
    let bridge = connect()?;
    let result = bridge.eval(&expr).and_then(|proxy| proxy.lua_type());
    bridge.close();
    println!("{}", result.with_context(|| format!("failed to evaluate `{expr}`"))?);
    Ok(())
}

fn print_help(_args: &[String]) -> Result<()> {
    println!("Usage: hsbridge <task> [lua...]");
    println!("Tasks:");
    for (name, _) in TASKS {
        println!("  - {name}");
    }
    println!("Environment: HSBRIDGE_CLI, HSBRIDGE_TIMEOUT_MS, HSBRIDGE_NAMESPACE, RUST_LOG");
    Ok(())
}
