//! Recorded sensor input: JSON frame streams and intensity grids.

use std::io::{BufRead, Read, Write};

use crate::blob::IntensityGrid;
use crate::error::Result;
use crate::model::Frame;

/// Reads whitespace-separated JSON frames, typically one per line.
pub fn read_frames(reader: impl Read) -> Result<Vec<Frame>> {
    let frames = serde_json::Deserializer::from_reader(reader)
        .into_iter::<Frame>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(frames)
}

/// Writes one JSON frame per line.
pub fn write_frames<'a>(mut writer: impl Write, frames: impl IntoIterator<Item = &'a Frame>) -> Result<()> {
    for frame in frames {
        serde_json::to_writer(&mut writer, frame)?;
        writer
            .write_all(b"\n")
            .map_err(serde_json::Error::io)?;
    }
    Ok(())
}

/// Reads a grid given as a JSON array of equally long rows.
pub fn read_grid(reader: impl BufRead) -> Result<IntensityGrid> {
    let rows: Vec<Vec<f32>> = serde_json::from_reader(reader)?;
    IntensityGrid::from_rows(rows)
}
