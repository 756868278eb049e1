use anyhow::anyhow;
use core::cell::RefCell;
use image::FlashImage;
use otaflash_core::{
    migrate::{Migrator, PreservedMigrator, SkipMigration},
    UpdateConfig, UpdateResult, UpdateSession,
};
use otaflash_embedded::{MemFlash, OtaPartitions};
use otaflash_transport::{
    download_update, feed_bytes, handle_upload, upload::UPLOAD_CHUNK_LEN, write_update_file,
    DeviceProfile, HostMounter, UreqFetch,
};
use std::path::PathBuf;
use tracing::{event, Level};

pub mod image;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(short, long, value_name = "FILE", default_value = "otaflash.json")]
    profile: PathBuf,
    #[arg(short)]
    verbosity: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default device profile and an erased flash image
    Init {
        #[arg(value_name = "FLASH_IMAGE")]
        flash: PathBuf,
        #[arg(short, long)]
        module: Option<String>,
    },
    /// Combine an executable and a filesystem image into one update file
    Build {
        #[arg(short, long)]
        module: Option<String>,
        #[arg(long, value_name = "FILE")]
        executable: PathBuf,
        #[arg(long, value_name = "FILE")]
        filesystem: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Show what an update file contains
    Inspect {
        #[arg(value_name = "UPDATE_FILE")]
        file: PathBuf,
        /// Also check it is meant for the profile's module
        #[arg(long)]
        check_module: bool,
    },
    /// Apply an update to a flash image
    Apply {
        #[arg(value_name = "FLASH_IMAGE")]
        flash: PathBuf,
        #[command(subcommand)]
        source: Source,
        /// Directory holding one subdirectory per filesystem region. Overrides the profile.
        /// Without either nothing is carried over to the new filesystem.
        #[arg(long, value_name = "DIR")]
        mount_root: Option<PathBuf>,
    },
    /// Show which pair boots and where the regions are
    Status {
        #[arg(value_name = "FLASH_IMAGE")]
        flash: PathBuf,
    },
}

#[derive(Subcommand)]
enum Source {
    /// An update file on disk
    File {
        #[arg(value_name = "UPDATE_FILE")]
        file: PathBuf,
    },
    /// A multipart/form-data request body as a browser would post it
    Upload {
        #[arg(value_name = "BODY")]
        body: PathBuf,
    },
    /// Download the update file
    Url {
        #[arg(value_name = "URL")]
        url: String,
    },
}

fn run_update<M: Migrator>(
    partitions: &OtaPartitions<'_, MemFlash>,
    profile: &DeviceProfile,
    config: UpdateConfig,
    migrator: M,
    source: &Source,
) -> anyhow::Result<UpdateResult> {
    let mut session = UpdateSession::new(config, partitions.update_targets(migrator));

    let result = match source {
        Source::File { file } => {
            let bytes = std::fs::read(file)?;
            feed_bytes(&mut session, &bytes, UPLOAD_CHUNK_LEN)?
        }
        Source::Upload { body } => {
            let body = std::fs::read(body)?;
            let response = handle_upload(&mut session, &body[..], body.len());
            event!(
                Level::INFO,
                status = response.status,
                content_type = response.content_type,
                "upload answered"
            );
            response.result
        }
        Source::Url { url } => download_update(
            &mut session,
            &UreqFetch::new(profile.download_timeout()),
            url,
            profile.download_chunk_len,
        ),
    };
    let progress = session.progress();
    event!(
        Level::DEBUG,
        executable = progress.executable_written,
        filesystem = progress.filesystem_written,
        "bytes written"
    );
    Ok(result)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if cli.verbosity {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .pretty()
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber)?;

    let load_profile = || DeviceProfile::load(&cli.profile);

    match cli.command {
        Command::Init { flash, module } => {
            let mut profile = DeviceProfile::default();
            if let Some(module) = module {
                profile.module_identity = module;
            }
            if !cli.profile.exists() {
                profile.save(&cli.profile)?;
                eprintln!("Wrote device profile to {}", cli.profile.display());
            } else {
                profile = load_profile()?;
            }
            FlashImage::new(flash.clone()).create(&profile)?;
            eprintln!(
                "Wrote {} bytes of erased flash to {}",
                profile.flash_size,
                flash.display()
            );
        }
        Command::Build {
            module,
            executable,
            filesystem,
            out,
        } => {
            let module = match module {
                Some(module) => module,
                None => load_profile()?.module_identity,
            };
            let summary = write_update_file(&module, &executable, &filesystem, &out)?;
            println!("{summary}");
        }
        Command::Inspect { file, check_module } => {
            let module = if check_module {
                Some(load_profile()?.module_identity)
            } else {
                None
            };
            let bytes = std::fs::read(&file)?;
            let summary = otaflash_transport::inspect_update_file(&bytes, module.as_deref())?;
            println!("{summary}");
            if !summary.is_complete() || !summary.filesystem_hash_matches() {
                return Err(anyhow!("{} would not pass validation", file.display()));
            }
        }
        Command::Apply {
            flash,
            source,
            mount_root,
        } => {
            let profile = load_profile()?;
            let image = FlashImage::new(flash);
            let flash = RefCell::new(image.load(&profile)?);
            let result = {
                let partitions = OtaPartitions::load(
                    &flash,
                    &profile.partition_rows(),
                    &profile.otadata_label,
                )?;
                let mut config = profile.update_config();
                if let Source::Upload { .. } = source {
                    config = config.with_multipart();
                }
                match mount_root.or_else(|| profile.mount_root.clone()) {
                    Some(mount_root) => {
                        let map = partitions.region_map();
                        let migrator = PreservedMigrator::for_config(
                            HostMounter::new(mount_root),
                            map.filesystem_running.label.clone(),
                            map.filesystem_target.label.clone(),
                            &config,
                        );
                        run_update(&partitions, &profile, config, migrator, &source)?
                    }
                    None => run_update(&partitions, &profile, config, SkipMigration, &source)?,
                }
            };
            // a failed attempt still leaves its writes behind, same as on the device
            image.save(flash.into_inner())?;
            println!("{result}");
            if !result.is_ok() {
                std::process::exit(result.code() as i32);
            }
        }
        Command::Status { flash } => {
            let profile = load_profile()?;
            let flash = RefCell::new(FlashImage::new(flash).load(&profile)?);
            let partitions =
                OtaPartitions::load(&flash, &profile.partition_rows(), &profile.otadata_label)?;
            let status = partitions
                .selector()
                .status()
                .map_err(|e| anyhow!("reading the boot selection failed: {e:?}"))?;
            match status {
                Some(status) => println!(
                    "boot slot {} (record {})",
                    status.slot, status.sequence
                ),
                None => println!("boot slot 0 (never updated)"),
            }
            for descriptor in partitions.region_map().descriptors() {
                println!(
                    "{:<10} {:?} {:?} at {:#08x}, {} bytes",
                    descriptor.label,
                    descriptor.role,
                    descriptor.slot,
                    descriptor.base_address,
                    descriptor.size_bytes
                );
            }
        }
    }

    Ok(())
}
