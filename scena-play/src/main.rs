// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::process;

use clap::{Arg, Command};
use log::{error, info, warn};
use scena_core::errors::Result;
use scena_core::io::MediaSourceStream;
use scena_u3d::U3dReader;

fn main() {
    pretty_env_logger::init();

    let matches = Command::new("Scena Play")
        .version("1.0")
        .author("The Project Scena Developers")
        .about("Decode U3D scene files with Scena")
        .arg(
            Arg::new("INPUT")
                .help("The input file path")
                .required(true)
                .index(1),
        )
        .get_matches();

    let path = matches.value_of("INPUT").unwrap();

    let code = match run(path) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            1
        }
    };
    process::exit(code);
}

fn run(path: &str) -> Result<i32> {
    println!("Universal 3D loader");

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            error!("failed to open {}: {}", path, err);
            return Ok(1);
        }
    };

    let mss = MediaSourceStream::new(Box::new(file));
    let u3d = U3dReader::try_new(mss)?;
    info!("{} successfully parsed", path);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    u3d.dump_tree(&mut out).ok();
    out.flush().ok();

    // Prefer the view named DefaultView, else the first declared view.
    let view_name = if u3d.view("DefaultView").is_some() {
        info!("DefaultView found");
        "DefaultView".to_string()
    } else {
        match u3d.first_view() {
            Some((name, _)) => name.to_string(),
            None => {
                error!("no view node was found");
                return Ok(1);
            }
        }
    };

    if let Some(view_matrix) = u3d.world_transform(&view_name, "") {
        if !view_matrix.is_view() {
            warn!("view matrix does not seem to be legal");
        }
    }

    let descriptor = u3d.render_descriptor();
    let scene = u3d.scene_descriptor(&view_name, 0)?;

    println!("view: {}", view_name);
    println!("shader groups: {}", descriptor.shader_groups.len());
    println!("textures: {}", descriptor.textures.len());
    for (name, group) in &descriptor.render_groups {
        let vertices: usize = group.elements.iter().map(|e| e.vertex_count).sum();
        println!("render group <{}>: {} elements, {} vertices", name, group.elements.len(), vertices);
    }
    println!("lights: {}", scene.lights.len());
    for light in &scene.lights {
        info!("light {:?} at {:?}", light.light_type, light.position);
    }
    println!("models: {}", scene.models.len());
    for model in &scene.models {
        let kind = u3d
            .model(&model.resource_name)
            .map(|entry| match entry.resource {
                scena_u3d::reader::ModelResource::Mesh(_) => "mesh",
                scena_u3d::reader::ModelResource::Points(_) => "point set",
                scena_u3d::reader::ModelResource::Lines(_) => "line set",
            })
            .unwrap_or("missing");
        println!("  model => <{}> ({})", model.resource_name, kind);
    }

    Ok(0)
}
