use std::path::PathBuf;
use std::sync::Arc;

use isoforge::compute::core::ComputeCore;
use isoforge::config::ConfigManager;
use isoforge::field::sdf::{gyroid, sphere, Sdf};
use isoforge::io::cli::CliWriter;

fn usage() -> ! {
    eprintln!("usage: isoforge <model> <output.cli> [layer_thickness_mm]");
    eprintln!();
    eprintln!("models:");
    eprintln!("  sphere[:radius]          solid sphere (default radius 20 mm)");
    eprintln!("  gyroid[:period,wall]     gyroid lattice (default 10 mm period, 0.6 mm wall)");
    std::process::exit(2);
}

fn parse_model(spec: &str) -> Option<Arc<dyn Sdf + Send + Sync>> {
    let (name, params) = match spec.split_once(':') {
        Some((name, params)) => (name, Some(params)),
        None => (spec, None),
    };
    match name {
        "sphere" => {
            let radius: f32 = params.and_then(|p| p.parse().ok()).unwrap_or(20.0);
            Some(Arc::new(sphere(radius)))
        }
        "gyroid" => {
            let (period, wall) = params
                .and_then(|p| {
                    let (a, b) = p.split_once(',')?;
                    Some((a.parse().ok()?, b.parse().ok()?))
                })
                .unwrap_or((10.0, 0.6));
            // Clip the infinite lattice to a printable ball.
            let lattice = gyroid(period, wall);
            let bound = sphere(25.0);
            Some(Arc::new(move |p| lattice.eval(p).max(bound.eval(p))))
        }
        _ => None,
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        usage();
    }
    let Some(model) = parse_model(&args[0]) else {
        eprintln!("unknown model: {}", args[0]);
        usage();
    };
    let output = PathBuf::from(&args[1]);

    let config = ConfigManager::new();
    let layer_thickness: f32 = args
        .get(2)
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| config.get_value("slicer", "layer_thickness_mm", 0.1f32));

    let mut core = ComputeCore::new(model);
    core.set_layer_thickness(layer_thickness);

    if !core.update_bbox() {
        eprintln!("could not determine the model bounding box");
        std::process::exit(1);
    }
    let bbox = core.bounding_box().expect("bbox was just updated");
    log::info!(
        "model bounds: {:.2?} .. {:.2?}{}",
        bbox.min,
        bbox.max,
        if core.is_bbox_partial() { " (partial)" } else { "" }
    );

    core.precompute_sdf_for_whole_build_platform();

    let mut writer = CliWriter::new(layer_thickness);
    match writer.begin_export(&output, &mut core) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
    loop {
        match writer.advance_export(&mut core) {
            Ok(true) => {
                let percent = (writer.progress() * 100.0).min(100.0);
                log::info!("exported layer at {:.2} mm ({percent:.0}%)", core.slice_height());
            }
            Ok(false) => break,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }
    if let Err(err) = writer.finalize_export() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    log::info!("wrote {}", output.display());
}
