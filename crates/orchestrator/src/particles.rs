//! Particle set files.
//!
//! ```text
//! 3
//! 1 120.50 34.20
//! 2 120.55 34.25
//! 3 120.60 34.30 -2.0
//! ```
//!
//! The first line is the particle count; each following line is
//! `index x y [z]`, whitespace separated.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::ParticleFile {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn parse_field<T: std::str::FromStr>(
    path: &Path,
    line: usize,
    name: &str,
    field: Option<&str>,
) -> Result<T> {
    let field = field.ok_or_else(|| parse_error(path, line, format!("missing {name}")))?;
    field
        .parse()
        .map_err(|_| parse_error(path, line, format!("invalid {name} '{field}'")))
}

/// Parse particle records from `content`; `path` is used for error context.
pub fn parse_particles(path: &Path, content: &str) -> Result<Vec<Particle>> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (count_line, header) = lines
        .next()
        .ok_or_else(|| parse_error(path, 1, "missing particle count"))?;
    let declared: usize = parse_field(path, count_line, "particle count", header.split_whitespace().next())?;

    let mut particles = Vec::with_capacity(declared);
    for (number, line) in lines {
        let mut fields = line.split_whitespace();
        let id = parse_field(path, number, "index", fields.next())?;
        let x = parse_field(path, number, "x", fields.next())?;
        let y = parse_field(path, number, "y", fields.next())?;
        let z = match fields.next() {
            Some(z) => Some(parse_field(path, number, "z", Some(z))?),
            None => None,
        };
        particles.push(Particle { id, x, y, z });
    }

    if particles.len() != declared {
        return Err(parse_error(
            path,
            count_line,
            format!("declares {declared} particles, found {}", particles.len()),
        ));
    }
    Ok(particles)
}

pub fn read_particles(path: &Path) -> Result<Vec<Particle>> {
    let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    parse_particles(path, &content)
}

pub fn render_particles(particles: &[Particle]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", particles.len());
    for p in particles {
        match p.z {
            Some(z) => {
                let _ = writeln!(out, "{} {} {} {}", p.id, p.x, p.y, z);
            }
            None => {
                let _ = writeln!(out, "{} {} {}", p.id, p.x, p.y);
            }
        }
    }
    out
}

pub fn write_particles(path: &Path, particles: &[Particle]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    fs::write(path, render_particles(particles)).map_err(|err| Error::io(path, err))
}
