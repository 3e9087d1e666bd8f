//! list_cameras - enumerate cameras for a configured source

use anyhow::Result;
use clap::Parser;

use camera_detect::backend_for_source;
use camera_detect::camera::select_device;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera source (`stub://...`, a V4L2 node, or a directory such as /dev).
    #[arg(long, env = "PREVIEW_CAMERA_SOURCE", default_value = "stub://default")]
    source: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let backend = backend_for_source(&args.source)?;
    let devices = backend.devices()?;
    if devices.is_empty() {
        println!("no camera devices found ({} backend)", backend.name());
        return Ok(());
    }

    let preferred = select_device(&devices).map(|device| device.name.clone());
    for device in &devices {
        let marker = if Some(&device.name) == preferred.as_ref() {
            "*"
        } else {
            " "
        };
        let facing = if device.is_front_facing { "front" } else { "back" };
        println!("{} {} ({})", marker, device.name, facing);
    }
    Ok(())
}
