//! edge-bridge host
//!
//! Runs the toy inference model through the compute interpreter, offloading
//! each invocation to a simulated USB accelerator over the libusb emulation.

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use common::{BridgeConfig, HostHandle, HostRuntime, setup_logging};
use host::{ToyBackend, UsbAccelerator, encode_model, simulated_bridge};
use interpreter::{Accelerator, EDGETPU_CUSTOM_OP, Interpreter, InterpreterOptions};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use usb::{Context, ContextOptions};

#[derive(Parser, Debug)]
#[command(name = "bridge-host")]
#[command(
    author,
    version,
    about = "edge-bridge host - run a model on an emulated USB accelerator"
)]
#[command(long_about = "
Loads a toy model into the compute interpreter and invokes it repeatedly.
Models compiled for the accelerator are offloaded to a simulated USB device
through the libusb emulation layer.

EXAMPLES:
    # Run ten invocations on the accelerator
    bridge-host

    # Run on the CPU only
    bridge-host --cpu-only --invocations 100

    # List accelerators without running the model
    bridge-host --list-devices

    # Run with debug logging
    bridge-host --log-level debug

CONFIGURATION:
    The host looks for configuration in the following order:
    1. Path specified with --config
    2. ~/.config/edge-bridge/config.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List accelerator devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Number of invocations to run
    #[arg(short = 'n', long, default_value_t = 10)]
    invocations: u32,

    /// Length of the model's input and output tensors
    #[arg(short = 's', long, default_value_t = 1024)]
    tensor_size: u32,

    /// Run a model without the accelerator operator
    #[arg(long)]
    cpu_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config.as_deref() {
        Some(path) => BridgeConfig::load(Some(path)).context("Failed to load configuration")?,
        None => BridgeConfig::load_or_default(None),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("edge-bridge host v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let runtime = HostRuntime::start().context("Failed to start host context")?;
    let options =
        ContextOptions::from_settings(&config.usb).context("Invalid device filter")?;
    let context = Context::init_with_options(Arc::new(simulated_bridge()), runtime.handle(), options)
        .context("Failed to initialize USB emulation")?;

    let result = if args.list_devices {
        list_devices_mode(&context, &config)
    } else {
        run_model(&args, &config, &context, &runtime.handle())
    };

    info!("Shutting down");
    context.exit();
    drop(runtime);

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// List accelerators and exit
fn list_devices_mode(context: &Context, config: &BridgeConfig) -> Result<()> {
    info!("Listing accelerator devices...");

    let accelerator = UsbAccelerator::new(context.clone(), config.accelerator.clone());
    let devices = accelerator.list_devices();

    if devices.is_empty() {
        println!("No accelerator found.");
        return Ok(());
    }

    println!("Found {} accelerator(s):\n", devices.len());
    for device in devices {
        println!("  {}", device);
        let Some(usb_device) = parse_bus_port(&device.path)
            .and_then(|(bus, port)| context.device(bus, port))
        else {
            continue;
        };
        let descriptor = usb_device.descriptor();
        println!(
            "      {:04x}:{:04x} bcdUSB {:#06x} Speed: {:?}",
            descriptor.vendor_id,
            descriptor.product_id,
            descriptor.usb_version.0,
            usb_device.speed()
        );
        println!();
    }
    Ok(())
}

fn parse_bus_port(path: &str) -> Option<(u8, u8)> {
    let (bus, port) = path.rsplit('/').next()?.split_once('-')?;
    Some((bus.parse().ok()?, port.parse().ok()?))
}

/// Build the interpreter and run the requested invocations
fn run_model(
    args: &Args,
    config: &BridgeConfig,
    context: &Context,
    host: &HostHandle,
) -> Result<()> {
    let custom_op = (!args.cpu_only).then_some(EDGETPU_CUSTOM_OP);
    let model = encode_model(args.tensor_size, custom_op);
    info!(
        "Model: {} byte tensors, {}",
        args.tensor_size,
        if args.cpu_only { "CPU" } else { "accelerator" }
    );

    let accelerator = UsbAccelerator::new(context.clone(), config.accelerator.clone());
    let interpreter = Interpreter::create(
        &model,
        &ToyBackend,
        Some(&accelerator),
        host,
        &InterpreterOptions::from_config(config),
    )
    .context("Failed to create interpreter")?;

    let mut rng = rand::rng();
    let mut input = vec![0u8; args.tensor_size as usize];
    let started = Instant::now();

    for i in 0..args.invocations {
        rng.fill(&mut input[..]);
        interpreter
            .set_input(0, &input)
            .context("Failed to write input tensor")?;

        let call = Instant::now();
        host.block_on(interpreter.invoke())
            .context("Host context stopped")?
            .with_context(|| format!("Invocation {} failed", i))?;
        debug!(invocation = i, elapsed = ?call.elapsed(), "Invocation complete");

        let output = interpreter
            .output(0)
            .context("Model has no output tensor")?;
        let mismatch = input
            .iter()
            .zip(output.data())
            .position(|(&x, &y)| x.wrapping_add(1) != y);
        if let Some(index) = mismatch {
            bail!("Invocation {} produced a wrong value at index {}", i, index);
        }
    }

    let elapsed = started.elapsed();
    info!(
        "{} invocation(s) in {:?} ({}delegated)",
        args.invocations,
        elapsed,
        if interpreter.is_delegated() { "" } else { "not " }
    );
    println!(
        "{} invocation(s) verified in {:.1} ms",
        args.invocations,
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}
