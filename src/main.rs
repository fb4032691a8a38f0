//! `genprotimg` driver: argument parsing, logging, signal handling, and
//! wiring the library's `PvImage` lifecycle end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use genprotimg::cert::NoCertCheck;
use genprotimg::cli::CliArgs;
use genprotimg::component::{Component, ComponentType};
use genprotimg::error::{CryptoError, GenprotimgError};
use genprotimg::pv_image::{self, PvImage, PvImageConfig};

/// Fixed load address the Secure Execution boot firmware places stage-3a
/// at.
const STAGE3A_LOAD_ADDRESS: u64 = 0x0;

const DEFAULT_STAGE3A_PATH: &str = "/usr/lib/s390-tools/stage3a.bin";
const DEFAULT_STAGE3B_PATH: &str = "/usr/lib/s390-tools/stage3b.bin";

fn main() -> Result<()> {
    let args = CliArgs::parse();
    if args.version {
        println!("genprotimg {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    init_logging(args.verbosity);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to install SIGINT/SIGTERM handler")?;
    }

    run(args, &interrupted)
}

fn run(args: CliArgs, interrupted: &AtomicBool) -> Result<()> {
    if !args.no_cert_check {
        // clap's `required = true` on a repeatable arg guarantees at least one value.
        let path = args.host_certificates[0].clone();
        return Err(GenprotimgError::Crypto(CryptoError::VerificationDisabled { path }))
            .context("pass --no-cert-check to proceed without trust-root verification (see DESIGN.md)");
    }

    tracing::info!(certs = args.host_certificates.len(), "loading host certificates");
    let host_keys = pv_image::load_host_keys(&args.host_certificates, &NoCertCheck)
        .context("failed to load host certificates")?;

    let stage3a_path = template_path("GENPROTIMG_STAGE3A", DEFAULT_STAGE3A_PATH);
    let stage3a_template = std::fs::read(&stage3a_path)
        .with_context(|| format!("failed to read stage-3a template at {stage3a_path:?}"))?;

    let stage3b_path = template_path("GENPROTIMG_STAGE3B", DEFAULT_STAGE3B_PATH);
    let stage3b_template = std::fs::read(&stage3b_path)
        .with_context(|| format!("failed to read stage-3b template at {stage3b_path:?}"))?;

    let component_count = 2 + args.ramdisk.is_some() as usize + args.parmfile.is_some() as usize;

    let cfg = PvImageConfig {
        pcf_hex: args.pcf.as_deref(),
        scf_hex: args.scf.as_deref(),
        psw_hex: args.psw.as_deref(),
        header_key_path: args.header_key.as_deref(),
        comp_key_path: args.comp_key.as_deref(),
        comm_key_path: args.comm_key.as_deref(),
        host_keys,
        stage3a_template,
        stage3a_load_address: STAGE3A_LOAD_ADDRESS,
        component_count,
    };

    let mut image = PvImage::new(cfg).context("failed to initialize image builder")?;

    tracing::debug!(path = ?args.image, "adding kernel component");
    let kernel = Component::new_file(ComponentType::Kernel, &args.image)
        .with_context(|| format!("failed to read kernel image {:?}", args.image))?;
    image.add_component(kernel).context("failed to prepare kernel component")?;

    if let Some(parmfile) = &args.parmfile {
        tracing::debug!(path = ?parmfile, "adding parmfile component");
        let comp = Component::new_file(ComponentType::Cmdline, parmfile)
            .with_context(|| format!("failed to read parmfile {parmfile:?}"))?;
        image.add_component(comp).context("failed to prepare parmfile component")?;
    }

    if let Some(ramdisk) = &args.ramdisk {
        tracing::debug!(path = ?ramdisk, "adding ramdisk component");
        let comp = Component::new_file(ComponentType::Initrd, ramdisk)
            .with_context(|| format!("failed to read ramdisk {ramdisk:?}"))?;
        image.add_component(comp).context("failed to prepare ramdisk component")?;
    }

    check_interrupted(interrupted)?;

    image
        .append_stage3b(&stage3b_template)
        .context("failed to prepare stage-3b component")?;

    check_interrupted(interrupted)?;

    image.finalize().context("failed to finalize image")?;

    check_interrupted(interrupted)?;

    image
        .write(&args.output)
        .with_context(|| format!("failed to write output image {:?}", args.output))?;

    tracing::info!(output = ?args.output, "wrote image");
    Ok(())
}

fn check_interrupted(interrupted: &AtomicBool) -> Result<()> {
    if interrupted.load(Ordering::SeqCst) {
        bail!("interrupted");
    }
    Ok(())
}

fn template_path(env_var: &str, default: &str) -> PathBuf {
    std::env::var_os(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
