use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::config::{ConvertOptions, LayerTable};
use crate::export::{GltfDocument, OutputFormat};

mod config;
mod converter;
mod export;
mod geometry;
mod layout;
mod math;
mod mesh;
mod scene_graph;

#[derive(Parser, Debug)]
#[command(
    name = "gds-extrude",
    about = "Extrudes a GDSII layout into an instanced glTF scene",
    version
)]
struct Args {
    /// GDSII stream file to convert.
    input: PathBuf,

    /// JSON layer table to use instead of the built-in SkyWater 130 stack.
    #[arg(long)]
    layers: Option<PathBuf>,

    /// Cell to use as the scene root.
    #[arg(long)]
    top: Option<String>,

    /// Distance boundary vertices are pulled inwards before triangulation.
    #[arg(long, default_value_t = 1e-5)]
    inset: f64,

    /// Write a single .glb file instead of .gltf + .bin.
    #[arg(long)]
    binary: bool,

    /// Build meshes on one thread.
    #[arg(long)]
    serial: bool,

    /// Output path. Defaults to the input path with .gltf or .glb appended.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    pretty_env_logger::init();

    let args = Args::parse();

    if !args.input.is_file() {
        log::error!("Input file {} does not exist", args.input.display());
        return Ok(ExitCode::FAILURE);
    }

    let layers = match &args.layers {
        Some(path) => LayerTable::from_json_file(path)?,
        None => LayerTable::sky130(),
    };
    if layers.is_empty() {
        log::warn!("The layer table is empty, no geometry will be extruded");
    } else {
        log::info!("Extruding {} layers", layers.len());
    }

    let options = ConvertOptions {
        inset: args.inset,
        top_cell: args.top.clone(),
        parallel: !args.serial,
    };

    log::info!("Reading {}", args.input.display());
    let layout = layout::read_gds(&args.input)?;

    let conversion = converter::convert(&layout, &layers, &options)?;

    let format = if args.binary {
        OutputFormat::Glb
    } else {
        OutputFormat::Gltf
    };
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| format.default_output_path(&args.input));

    let document = GltfDocument::build(&conversion.scene, &conversion.registry, &layers)?;
    document.write(&output, format)?;

    Ok(ExitCode::SUCCESS)
}
