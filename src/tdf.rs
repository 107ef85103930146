/*!
Reading of IGV TDF (tiled data format) files.

A TDF file is always little-endian. After a 24-byte fixed header comes a
variable descriptive block, then datasets and groups located through a
master index. Datasets hold a regular grid of tiles, each tile carrying
per-track parallel float arrays; tiles are individually zlib-compressed
when the header flags say so. Writing TDF is not supported.
*/
use std::collections::HashMap;
use std::path::Path;

use byteordered::Endianness;
use log::warn;

use crate::error::{Result, TrackError};
use crate::utils::rom::{Compression, RomAccess, RomBuffer, RomFile};

const GZIP_FLAG: i32 = 0x1;

/// The fixed part of a TDF header.
#[derive(Clone, Debug)]
pub struct TdfHeader {
    pub magic: [u8; 4],
    pub version: i32,
    pub index_offset: u64,
    pub index_size: i32,
    pub header_size: i32,
}

#[derive(Copy, Clone, Debug)]
struct TdfIndexEntry {
    offset: i64,
    size: i32,
}

/// A reader over one TDF file.
pub struct TdfFile {
    rom: RomFile,
    pub header: TdfHeader,
    pub window_functions: Vec<String>,
    pub track_type: String,
    pub track_line: String,
    pub track_names: Vec<String>,
    pub build: String,
    compressed: bool,
    datasets: HashMap<String, TdfIndexEntry>,
    groups: HashMap<String, TdfIndexEntry>,
}

/// A dataset: a grid of equally wide tiles for one chromosome and zoom.
#[derive(Clone, Debug)]
pub struct TdfDataset {
    pub attributes: HashMap<String, String>,
    pub data_type: String,
    pub tile_width: f32,
    pub(crate) tiles: Vec<(i64, i32)>,
}

impl TdfDataset {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }
}

/// A group holds only key-value attributes.
#[derive(Clone, Debug)]
pub struct TdfGroup {
    pub attributes: HashMap<String, String>,
}

/// One decoded tile, in any of the three layouts.
#[derive(Clone, Debug, PartialEq)]
pub enum TdfTile {
    /// Equally spaced values; position `i` covers
    /// `[start + i*span, start + (i+1)*span)`.
    Fixed {
        start: i32,
        span: f64,
        values: Vec<Vec<f32>>,
    },
    /// Explicit starts with a fixed span.
    Variable {
        span: i32,
        positions: Vec<i32>,
        values: Vec<Vec<f32>>,
    },
    /// Explicit starts and ends.
    Bed {
        starts: Vec<i32>,
        ends: Vec<i32>,
        values: Vec<Vec<f32>>,
    },
}

impl TdfTile {
    /// Number of positions in this tile.
    pub fn size(&self) -> usize {
        match self {
            TdfTile::Fixed { values, .. } => values.first().map_or(0, |v| v.len()),
            TdfTile::Variable { positions, .. } => positions.len(),
            TdfTile::Bed { starts, .. } => starts.len(),
        }
    }

    pub fn start(&self, idx: usize) -> i32 {
        match self {
            TdfTile::Fixed { start, span, .. } => start + (idx as f64 * span) as i32,
            TdfTile::Variable { positions, .. } => positions[idx],
            TdfTile::Bed { starts, .. } => starts[idx],
        }
    }

    pub fn end(&self, idx: usize) -> i32 {
        match self {
            TdfTile::Fixed { start, span, .. } => start + ((idx + 1) as f64 * span) as i32,
            TdfTile::Variable {
                span, positions, ..
            } => positions[idx] + span,
            TdfTile::Bed { ends, .. } => ends[idx],
        }
    }

    pub fn value(&self, track: usize, idx: usize) -> f32 {
        match self {
            TdfTile::Fixed { values, .. }
            | TdfTile::Variable { values, .. }
            | TdfTile::Bed { values, .. } => values[track][idx],
        }
    }
}

fn read_index_map(buf: &mut RomBuffer) -> Result<HashMap<String, TdfIndexEntry>> {
    let count = buf.get_i32()?;
    if count < 0 {
        return Err(TrackError::Format("tdf master index"));
    }
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let name = buf.get_cstring()?;
        let offset = buf.get_i64()?;
        let size = buf.get_i32()?;
        map.insert(name, TdfIndexEntry { offset, size });
    }
    Ok(map)
}

impl TdfFile {
    /// Opens a TDF file with the default access strategy.
    pub fn open(path: &Path) -> Result<TdfFile> {
        TdfFile::open_with(path, RomAccess::default())
    }

    pub fn open_with(path: &Path, access: RomAccess) -> Result<TdfFile> {
        let rom = RomFile::open(path, access, Endianness::Little)?;
        let mut buf = rom.buffer()?;

        let magic_bytes = buf.get_bytes(4)?;
        let magic = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
        if &magic != b"TDF4" && &magic != b"IBF4" {
            return Err(TrackError::BadSignature);
        }
        let version = buf.get_i32()?;
        if version < 3 {
            return Err(TrackError::UnsupportedVersion(version as u16));
        }
        let index_offset = buf.get_i64()?;
        let index_size = buf.get_i32()?;
        let header_size = buf.get_i32()?;
        if index_offset < 0 {
            return Err(TrackError::Format("tdf header"));
        }

        let window_function_count = buf.get_i32()?;
        let mut window_functions = Vec::with_capacity(window_function_count.max(0) as usize);
        for _ in 0..window_function_count {
            window_functions.push(buf.get_cstring()?);
        }
        let track_type = buf.get_cstring()?;
        let track_line = buf.get_cstring()?.trim().to_owned();
        let track_name_count = buf.get_i32()?;
        let mut track_names = Vec::with_capacity(track_name_count.max(0) as usize);
        for _ in 0..track_name_count {
            track_names.push(buf.get_cstring()?);
        }
        let build = buf.get_cstring()?;
        let flags = buf.get_i32()?;
        let compressed = flags & GZIP_FLAG != 0;

        let mut index_buf = rom.buffer_at(index_offset as u64)?;
        let datasets = read_index_map(&mut index_buf)?;
        let groups = read_index_map(&mut index_buf)?;

        Ok(TdfFile {
            rom,
            header: TdfHeader {
                magic,
                version,
                index_offset: index_offset as u64,
                index_size,
                header_size,
            },
            window_functions,
            track_type,
            track_line,
            track_names,
            build,
            compressed,
            datasets,
            groups,
        })
    }

    /// An independent reader over the same file.
    pub fn duplicate(&self) -> Result<TdfFile> {
        Ok(TdfFile {
            rom: self.rom.duplicate()?,
            header: self.header.clone(),
            window_functions: self.window_functions.clone(),
            track_type: self.track_type.clone(),
            track_line: self.track_line.clone(),
            track_names: self.track_names.clone(),
            build: self.build.clone(),
            compressed: self.compressed,
            datasets: self.datasets.clone(),
            groups: self.groups.clone(),
        })
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(|s| s.as_str())
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(|s| s.as_str())
    }

    /// Loads a dataset by its index name, e.g. `"/chr1/raw"`.
    pub fn dataset(&self, name: &str) -> Result<TdfDataset> {
        let entry = self
            .datasets
            .get(name)
            .ok_or_else(|| TrackError::NoSuchElement(name.to_owned()))?;
        let mut buf = self.rom.buffer_at(entry.offset as u64)?;

        let attribute_count = buf.get_i32()?;
        let mut attributes = HashMap::with_capacity(attribute_count.max(0) as usize);
        for _ in 0..attribute_count {
            let key = buf.get_cstring()?;
            let value = buf.get_cstring()?;
            attributes.insert(key, value);
        }
        let data_type = buf.get_cstring()?;
        if !data_type.eq_ignore_ascii_case("float") {
            return Err(TrackError::Format("tdf dataset"));
        }
        let tile_width = buf.get_f32()?;
        let tile_count = buf.get_i32()?;
        if tile_count < 0 {
            return Err(TrackError::Format("tdf dataset"));
        }
        let mut tiles = Vec::with_capacity(tile_count as usize);
        for _ in 0..tile_count {
            let offset = buf.get_i64()?;
            let size = buf.get_i32()?;
            tiles.push((offset, size));
        }
        Ok(TdfDataset {
            attributes,
            data_type,
            tile_width,
            tiles,
        })
    }

    /// Loads a group by its index name, e.g. `"/"`.
    pub fn group(&self, name: &str) -> Result<TdfGroup> {
        let entry = self
            .groups
            .get(name)
            .ok_or_else(|| TrackError::NoSuchElement(name.to_owned()))?;
        let mut buf = self.rom.buffer_at(entry.offset as u64)?;
        let attribute_count = buf.get_i32()?;
        let mut attributes = HashMap::with_capacity(attribute_count.max(0) as usize);
        for _ in 0..attribute_count {
            let key = buf.get_cstring()?;
            let value = buf.get_cstring()?;
            attributes.insert(key, value);
        }
        Ok(TdfGroup { attributes })
    }

    /// Decodes tile `idx` of a dataset, or `None` for an absent tile
    /// (negative stored offset).
    pub fn tile(&self, dataset: &TdfDataset, idx: usize) -> Result<Option<TdfTile>> {
        let (offset, size) = match dataset.tiles.get(idx) {
            Some(&(offset, size)) if offset >= 0 => (offset as u64, size as u64),
            _ => return Ok(None),
        };
        let compression = if self.compressed {
            Compression::Deflate
        } else {
            Compression::None
        };
        let mut data = self
            .rom
            .buffer()?
            .decompress(offset, size, compression, size as usize * 4)?;
        self.decode_tile(&mut data).map(Some)
    }

    fn expected_tracks(&self) -> usize {
        self.track_names.len().max(1)
    }

    fn decode_tile(&self, data: &mut RomBuffer) -> Result<TdfTile> {
        let kind = data.get_cstring()?;
        let tracks = self.expected_tracks();
        match kind.as_str() {
            "fixedStep" => {
                let count = data.get_i32()?;
                if count < 0 {
                    return Err(TrackError::Format("tdf tile"));
                }
                let start = data.get_i32()?;
                let span = data.get_f64()?;
                let mut values = Vec::with_capacity(tracks);
                for _ in 0..tracks {
                    values.push(data.get_floats(count as usize)?);
                }
                Ok(TdfTile::Fixed {
                    start,
                    span,
                    values,
                })
            }
            "variableStep" => {
                let start = data.get_i32()?;
                let span = data.get_f32()? as i32;
                let count = data.get_i32()?;
                if count < 0 {
                    return Err(TrackError::Format("tdf tile"));
                }
                let positions = data.get_ints(count as usize)?;
                if positions.first().map_or(false, |&p| p < start) {
                    return Err(TrackError::Format("tdf tile"));
                }
                let stored_tracks = data.get_i32()?;
                if stored_tracks != tracks as i32 {
                    return Err(TrackError::Format("tdf tile"));
                }
                let mut values = Vec::with_capacity(tracks);
                for _ in 0..tracks {
                    values.push(data.get_floats(count as usize)?);
                }
                Ok(TdfTile::Variable {
                    span,
                    positions,
                    values,
                })
            }
            "bed" | "bedWithName" => {
                if kind == "bedWithName" {
                    warn!("bedWithName tile decoded as bed; names are dropped");
                }
                let count = data.get_i32()?;
                if count < 0 {
                    return Err(TrackError::Format("tdf tile"));
                }
                let starts = data.get_ints(count as usize)?;
                let ends = data.get_ints(count as usize)?;
                let stored_tracks = data.get_i32()?;
                if stored_tracks != tracks as i32 {
                    return Err(TrackError::Format("tdf tile"));
                }
                let mut values = Vec::with_capacity(tracks);
                for _ in 0..tracks {
                    values.push(data.get_floats(count as usize)?);
                }
                if kind == "bedWithName" {
                    for _ in 0..count {
                        data.get_cstring()?;
                    }
                }
                Ok(TdfTile::Bed {
                    starts,
                    ends,
                    values,
                })
            }
            _ => Err(TrackError::Format("tdf tile")),
        }
    }

    /// All present tiles of a dataset whose range overlaps
    /// `[start_offset, end_offset)`. Absent tiles are skipped.
    pub fn query(
        &self,
        dataset: &TdfDataset,
        start_offset: u32,
        end_offset: u32,
    ) -> Result<Vec<TdfTile>> {
        if end_offset <= start_offset || dataset.tiles.is_empty() {
            return Ok(Vec::new());
        }
        let tile_width = dataset.tile_width as u32;
        if tile_width == 0 {
            return Err(TrackError::Format("tdf dataset"));
        }
        let first = (start_offset / tile_width) as usize;
        let last = (((end_offset - 1) / tile_width) as usize).min(dataset.tiles.len() - 1);
        let mut tiles = Vec::new();
        for idx in first..=last {
            if let Some(tile) = self.tile(dataset, idx)? {
                tiles.push(tile);
            }
        }
        Ok(tiles)
    }

    /// Summarizes `[start, end)` of a chromosome at a zoom level, reading
    /// the dataset `"/{chrom}/z{zoom}/{wf}"` and falling back to the raw
    /// dataset when the zoom is missing.
    pub fn summarize(&self, chrom: &str, start: u32, end: u32, zoom: i32) -> Result<TdfSummary> {
        let window_function = self
            .window_functions
            .first()
            .map(|s| s.as_str())
            .unwrap_or("mean");
        let zoomed = format!("/{}/z{}/{}", chrom, zoom, window_function);
        let dataset = match self.dataset(&zoomed) {
            Ok(dataset) => dataset,
            Err(TrackError::NoSuchElement(_)) => self.dataset(&format!("/{}/raw", chrom))?,
            Err(e) => return Err(e),
        };
        let tiles = self.query(&dataset, start, end)?;
        Ok(TdfSummary { tiles, start, end })
    }
}

/// The tiles backing one summarize call, viewed per track.
pub struct TdfSummary {
    tiles: Vec<TdfTile>,
    start: u32,
    end: u32,
}

impl TdfSummary {
    pub fn tiles(&self) -> &[TdfTile] {
        &self.tiles
    }

    /// Lazily yields `(start, end, value)` for one track, restricted to
    /// the summarized range, with missing (NaN) values filtered out.
    pub fn track(&self, track: usize) -> impl Iterator<Item = (i32, i32, f32)> + '_ {
        let (start, end) = (self.start as i64, self.end as i64);
        self.tiles.iter().flat_map(move |tile| {
            (0..tile.size()).filter_map(move |idx| {
                let value = tile.value(track, idx);
                let (record_start, record_end) = (tile.start(idx), tile.end(idx));
                let keep = !value.is_nan()
                    && (record_start as i64) < end
                    && (record_end as i64) > start;
                keep.then_some((record_start, record_end, value))
            })
        })
    }
}
