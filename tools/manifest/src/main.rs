use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use updater_core::{
    AppDescriptor, FirmwareManifest, IntegrityHash, IntegrityPolicy, Resolution, TrustLevel,
    UpdateInstaller, UpdateStatus, UpdaterConfig, VersionResolver,
};

mod host;

use host::{ProgressDevice, RamSlot, ReqwestTransport};

/// Size of `ota_0`/`ota_1` in partitions.csv.
const DEFAULT_SLOT_SIZE: u64 = 0x1e_0000;

#[derive(Parser)]
#[command(name = "fw-manifest")]
#[command(about = "Publish and check OTA manifests for the ESP32 updater", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the version.json the device polls for a firmware image
    Generate {
        /// Firmware image (.bin) to publish
        firmware: PathBuf,

        /// Version string the image reports
        #[arg(short, long)]
        version: String,

        /// Where the device downloads the image from
        #[arg(short, long)]
        url: String,

        #[arg(short, long, default_value = "version.json")]
        output: PathBuf,
    },
    /// Fetch a published manifest and dry-run the download a device would do
    Check {
        manifest_url: String,

        /// Version the simulated device runs
        #[arg(long, default_value = "0.0.0")]
        running_version: String,

        /// Release the simulated device rolled back from
        #[arg(long)]
        skipped_version: Option<String>,

        /// Fail when the release publishes no SHA-256
        #[arg(long)]
        require_hash: bool,

        #[arg(long, default_value_t = DEFAULT_SLOT_SIZE)]
        slot_size: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate {
            firmware,
            version,
            url,
            output,
        } => generate(&firmware, &version, &url, &output),
        Command::Check {
            manifest_url,
            running_version,
            skipped_version,
            require_hash,
            slot_size,
        } => check(&manifest_url, &running_version, skipped_version, require_hash, slot_size),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn generate(firmware: &Path, version: &str, url: &str, output: &Path) -> Result<(), String> {
    let data = fs::read(firmware)
        .map_err(|e| format!("Failed to read firmware {}: {}", firmware.display(), e))?;

    match AppDescriptor::parse(&data) {
        None => println!(
            "{} {} is not an ESP application image; the device will reject it",
            "⚠️".yellow(),
            firmware.display()
        ),
        Some(desc) if desc.version != version => println!(
            "{} {} reports version {}, not {}; devices would reinstall it on every check",
            "⚠️".yellow(),
            firmware.display(),
            desc.version,
            version
        ),
        Some(desc) => println!("{}Project:  {}", "   ".dimmed(), desc.project_name),
    }

    let body = build_manifest(&data, version, url)?;
    fs::write(output, &body).map_err(|e| format!("Failed to write {}: {}", output.display(), e))?;

    println!("{} Manifest written to {}", "✅".green(), output.display());
    println!("{}Version:  {}", "   ".dimmed(), version);
    println!(
        "{}Firmware: {} bytes ({:.2} MB)",
        "   ".dimmed(),
        data.len(),
        data.len() as f64 / 1024.0 / 1024.0
    );
    println!("{}SHA-256:  {}", "   ".dimmed(), IntegrityHash::of(&data));
    Ok(())
}

/// Manifest JSON for `data`, checked with the same parser the device runs.
fn build_manifest(data: &[u8], version: &str, url: &str) -> Result<Vec<u8>, String> {
    if data.is_empty() {
        return Err("Firmware image is empty".into());
    }

    let doc = serde_json::json!({
        "version": version,
        "download_url": url,
        "sha256": IntegrityHash::of(data).to_string(),
        "file_size": data.len(),
    });
    let mut body = serde_json::to_vec_pretty(&doc).map_err(|e| e.to_string())?;
    body.push(b'\n');

    FirmwareManifest::parse(&body).map_err(|e| format!("Refusing to publish: {}", e))?;
    Ok(body)
}

fn check(
    manifest_url: &str,
    running_version: &str,
    skipped_version: Option<String>,
    require_hash: bool,
    slot_size: u64,
) -> Result<(), String> {
    let config = UpdaterConfig {
        manifest_url: manifest_url.to_string(),
        download_timeout_secs: 300,
        chunk_size: 4096,
        integrity: if require_hash {
            IntegrityPolicy::RequireHash
        } else {
            IntegrityPolicy::AllowSizeOnly
        },
        ..Default::default()
    };

    println!("{} Checking {}", "🔍".blue(), manifest_url);
    let mut transport = ReqwestTransport;
    let resolver = VersionResolver::new(&config, running_version).skipping(skipped_version);

    let manifest = match resolver.resolve(&mut transport).map_err(|e| e.to_string())? {
        Resolution::UpToDate { version } => {
            println!("{} A device on {} is up to date", "✅".green(), version);
            return Ok(());
        }
        Resolution::Skipped { version } => {
            println!("{} A device that rolled back from {} leaves it alone", "⏭️".yellow(), version);
            return Ok(());
        }
        Resolution::UpdateAvailable(manifest) => manifest,
    };

    println!("{}Version:  {}", "   ".dimmed(), manifest.version);
    println!("{}Image:    {}", "   ".dimmed(), manifest.download_url);
    match &manifest.integrity_hash {
        Some(hash) => println!("{}SHA-256:  {}", "   ".dimmed(), hash),
        None => println!("{} No SHA-256 published, size-only check", "⚠️".yellow()),
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}%")
            .map_err(|e| e.to_string())?
            .progress_chars("#>-"),
    );

    let status = UpdateStatus::new();
    let mut device = ProgressDevice::new(status.clone(), bar.clone());
    let mut slot = RamSlot::new(slot_size);
    let mut installer = UpdateInstaller::new(&config);

    let result = installer.install(manifest, &mut transport, &mut slot, &mut device, &status);
    bar.finish_and_clear();
    let report = result.map_err(|e| format!("Download check failed: {}", e))?;

    let desc = slot
        .image()
        .and_then(AppDescriptor::parse)
        .ok_or("Downloaded image is not an ESP application image")?;
    if desc.version != report.version {
        println!(
            "{} Image reports version {} but the manifest says {}",
            "⚠️".yellow(),
            desc.version,
            report.version
        );
    }

    println!(
        "{} {} bytes downloaded, {}",
        "✅".green(),
        report.bytes_written,
        match report.trust {
            TrustLevel::HashVerified => "SHA-256 verified".green(),
            TrustLevel::SizeOnly => "size matched (no hash)".yellow(),
        }
    );
    if device.restart_requested {
        println!("\n{} A device on {} would install {}", "✨".green(), running_version, report.version);
    }
    Ok(())
}
