//! GDSII stream reader.
//!
//! Reads the subset of the stream format needed to rebuild the cell
//! hierarchy: boundaries, boxes and paths as polygons, and structure and
//! array references as [`Reference`]s. Text and node elements are skipped.

use std::path::Path;

use anyhow::Context;
use glam::DVec2;
use thiserror::Error;

use super::path::{path_outline, PathEnds};
use super::{Cell, Layout, Reference, Shape, CONTEXT_INFO_CELL};
use crate::config::LayerKey;

/// Property attribute holding an instance name.
const INSTANCE_NAME_ATTRIBUTE: i16 = 61;

const STRANS_REFLECTION: u16 = 0x8000;

/// Largest number of placements a single AREF may expand to.
const MAX_ARRAY_REFERENCES: usize = 1 << 22;

#[derive(Debug, Error)]
pub enum GdsError {
    #[error("Truncated record at byte {offset}")]
    Truncated { offset: usize },

    #[error("Invalid record length {length} at byte {offset}")]
    InvalidLength { length: usize, offset: usize },

    #[error("Record {record:?} at byte {offset} has data type {data_type}, expected {expected}")]
    UnexpectedDataType {
        record: RecordType,
        offset: usize,
        data_type: u8,
        expected: u8,
    },

    #[error("{element} at byte {offset} has no {field}")]
    MissingField {
        element: &'static str,
        field: &'static str,
        offset: usize,
    },

    #[error("AREF at byte {offset} expands to {count} references")]
    ArrayTooLarge { count: usize, offset: usize },

    #[error("Stream ended before ENDLIB")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Header,
    BgnLib,
    LibName,
    Units,
    EndLib,
    BgnStr,
    StrName,
    EndStr,
    Boundary,
    Path,
    Sref,
    Aref,
    Text,
    Layer,
    Datatype,
    Width,
    Xy,
    EndEl,
    Sname,
    ColRow,
    Node,
    Strans,
    Mag,
    Angle,
    PathType,
    PropAttr,
    PropValue,
    Box,
    BoxType,
    BgnExtn,
    EndExtn,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => RecordType::Header,
            0x01 => RecordType::BgnLib,
            0x02 => RecordType::LibName,
            0x03 => RecordType::Units,
            0x04 => RecordType::EndLib,
            0x05 => RecordType::BgnStr,
            0x06 => RecordType::StrName,
            0x07 => RecordType::EndStr,
            0x08 => RecordType::Boundary,
            0x09 => RecordType::Path,
            0x0A => RecordType::Sref,
            0x0B => RecordType::Aref,
            0x0C => RecordType::Text,
            0x0D => RecordType::Layer,
            0x0E => RecordType::Datatype,
            0x0F => RecordType::Width,
            0x10 => RecordType::Xy,
            0x11 => RecordType::EndEl,
            0x12 => RecordType::Sname,
            0x13 => RecordType::ColRow,
            0x15 => RecordType::Node,
            0x1A => RecordType::Strans,
            0x1B => RecordType::Mag,
            0x1C => RecordType::Angle,
            0x21 => RecordType::PathType,
            0x2B => RecordType::PropAttr,
            0x2C => RecordType::PropValue,
            0x2D => RecordType::Box,
            0x2E => RecordType::BoxType,
            0x30 => RecordType::BgnExtn,
            0x31 => RecordType::EndExtn,
            other => RecordType::Other(other),
        }
    }
}

mod data_type {
    pub const BIT_ARRAY: u8 = 1;
    pub const INT16: u8 = 2;
    pub const INT32: u8 = 3;
    pub const REAL4: u8 = 4;
    pub const REAL8: u8 = 5;
    pub const ASCII: u8 = 6;
}

#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub kind: RecordType,
    pub data_type: u8,
    pub offset: usize,
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    fn check(&self, expected: u8) -> Result<(), GdsError> {
        if self.data_type != expected {
            return Err(GdsError::UnexpectedDataType {
                record: self.kind,
                offset: self.offset,
                data_type: self.data_type,
                expected,
            });
        }
        Ok(())
    }

    pub fn bits(&self) -> Result<u16, GdsError> {
        self.check(data_type::BIT_ARRAY)?;
        self.int16s()
            .next()
            .map(|value| value as u16)
            .ok_or(GdsError::Truncated {
                offset: self.offset,
            })
    }

    pub fn int16(&self) -> Result<i16, GdsError> {
        self.check(data_type::INT16)?;
        self.int16s().next().ok_or(GdsError::Truncated {
            offset: self.offset,
        })
    }

    pub fn int16_values(&self) -> Result<Vec<i16>, GdsError> {
        self.check(data_type::INT16)?;
        Ok(self.int16s().collect())
    }

    pub fn int32(&self) -> Result<i32, GdsError> {
        self.int32_values()?
            .first()
            .copied()
            .ok_or(GdsError::Truncated {
                offset: self.offset,
            })
    }

    pub fn int32_values(&self) -> Result<Vec<i32>, GdsError> {
        self.check(data_type::INT32)?;
        Ok(self
            .payload
            .chunks_exact(4)
            .map(|chunk| i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    pub fn reals(&self) -> Result<Vec<f64>, GdsError> {
        match self.data_type {
            data_type::REAL8 => Ok(self
                .payload
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    decode_real8(bytes)
                })
                .collect()),
            data_type::REAL4 => Ok(self
                .payload
                .chunks_exact(4)
                .map(|chunk| decode_real4([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()),
            _ => self.check(data_type::REAL8).map(|_| Vec::new()),
        }
    }

    pub fn real(&self) -> Result<f64, GdsError> {
        self.reals()?.first().copied().ok_or(GdsError::Truncated {
            offset: self.offset,
        })
    }

    pub fn ascii(&self) -> Result<String, GdsError> {
        self.check(data_type::ASCII)?;
        let end = self
            .payload
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(self.payload.len());
        Ok(String::from_utf8_lossy(&self.payload[..end]).into_owned())
    }

    fn int16s(&self) -> impl Iterator<Item = i16> + 'a {
        let payload: &'a [u8] = self.payload;
        payload
            .chunks_exact(2)
            .map(|chunk| i16::from_be_bytes([chunk[0], chunk[1]]))
    }
}

/// Excess-64 base-16 real with a 56 bit mantissa.
pub fn decode_real8(bytes: [u8; 8]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7f) as i32 - 64;
    let mantissa = bytes[1..]
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | byte as u64);

    sign * (mantissa as f64 / 2f64.powi(56)) * 16f64.powi(exponent)
}

pub fn decode_real4(bytes: [u8; 4]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7f) as i32 - 64;
    let mantissa = bytes[1..]
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);

    sign * (mantissa as f64 / 2f64.powi(24)) * 16f64.powi(exponent)
}

pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn next_record(&mut self) -> Result<Record<'a>, GdsError> {
        let offset = self.offset;
        let header = self
            .data
            .get(offset..offset + 4)
            .ok_or(GdsError::UnexpectedEof)?;

        let length = u16::from_be_bytes([header[0], header[1]]) as usize;
        if length < 4 || length % 2 != 0 {
            return Err(GdsError::InvalidLength { length, offset });
        }

        let payload = self
            .data
            .get(offset + 4..offset + length)
            .ok_or(GdsError::Truncated { offset })?;

        self.offset += length;

        Ok(Record {
            kind: RecordType::from(header[2]),
            data_type: header[3],
            offset,
            payload,
        })
    }
}

/// Fields of one element, accumulated until ENDEL.
#[derive(Debug, Default)]
struct Element {
    layer: Option<i16>,
    datatype: Option<i16>,
    xy: Vec<i32>,
    width: i32,
    pathtype: i16,
    begin_extension: i32,
    end_extension: i32,
    sname: Option<String>,
    strans: u16,
    magnification: Option<f64>,
    angle: Option<f64>,
    colrow: Option<(i16, i16)>,
    display_name: Option<String>,
}

pub struct GdsParser<'a> {
    records: RecordReader<'a>,
    /// User units per database unit.
    scale: f64,
}

impl<'a> GdsParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            records: RecordReader::new(data),
            scale: 1.0,
        }
    }

    pub fn parse(mut self) -> anyhow::Result<Layout> {
        let mut name = String::new();
        let mut cells = Vec::new();

        loop {
            let record = self.records.next_record()?;

            match record.kind {
                RecordType::LibName => name = record.ascii()?,
                RecordType::Units => {
                    let units = record.reals()?;
                    self.scale = *units.first().ok_or(GdsError::Truncated {
                        offset: record.offset,
                    })?;
                }
                RecordType::BgnStr => {
                    let cell = self.parse_structure()?;

                    if cell.name == CONTEXT_INFO_CELL {
                        continue;
                    }

                    log::debug!(
                        "Read cell {}: {} shapes, {} references",
                        cell.name,
                        cell.shapes.len(),
                        cell.references.len()
                    );
                    cells.push(cell);
                }
                RecordType::EndLib => break,
                _ => {}
            }
        }

        let mut layout = Layout::new(name);
        for cell in cells {
            layout.add_cell(cell)?;
        }

        Ok(layout)
    }

    fn parse_structure(&mut self) -> Result<Cell, GdsError> {
        let mut name = String::new();
        let mut shapes = Vec::new();
        let mut references = Vec::new();

        loop {
            let record = self.records.next_record()?;

            match record.kind {
                RecordType::StrName => name = record.ascii()?,
                RecordType::Boundary | RecordType::Box => {
                    let element = self.parse_element()?;
                    shapes.extend(self.boundary_shape(&element, record.offset)?);
                }
                RecordType::Path => {
                    let element = self.parse_element()?;
                    shapes.extend(self.path_shape(&element, record.offset)?);
                }
                RecordType::Sref => {
                    let element = self.parse_element()?;
                    references.push(self.structure_reference(&element, record.offset)?);
                }
                RecordType::Aref => {
                    let element = self.parse_element()?;
                    references.extend(self.array_references(&element, record.offset)?);
                }
                RecordType::Text | RecordType::Node => {
                    self.parse_element()?;
                }
                RecordType::EndStr => break,
                _ => {}
            }
        }

        Ok(Cell {
            shapes,
            references,
            ..Cell::new(name)
        })
    }

    fn parse_element(&mut self) -> Result<Element, GdsError> {
        let mut element = Element::default();
        let mut property_attribute = None;

        loop {
            let record = self.records.next_record()?;

            match record.kind {
                RecordType::Layer => element.layer = Some(record.int16()?),
                RecordType::Datatype | RecordType::BoxType => {
                    element.datatype = Some(record.int16()?)
                }
                RecordType::Xy => element.xy = record.int32_values()?,
                RecordType::Width => element.width = record.int32()?,
                RecordType::PathType => element.pathtype = record.int16()?,
                RecordType::BgnExtn => element.begin_extension = record.int32()?,
                RecordType::EndExtn => element.end_extension = record.int32()?,
                RecordType::Sname => element.sname = Some(record.ascii()?),
                RecordType::Strans => element.strans = record.bits()?,
                RecordType::Mag => element.magnification = Some(record.real()?),
                RecordType::Angle => element.angle = Some(record.real()?),
                RecordType::ColRow => {
                    let values = record.int16_values()?;
                    if let [cols, rows, ..] = values[..] {
                        element.colrow = Some((cols, rows));
                    }
                }
                RecordType::PropAttr => property_attribute = Some(record.int16()?),
                RecordType::PropValue => {
                    if property_attribute.take() == Some(INSTANCE_NAME_ATTRIBUTE) {
                        element.display_name = Some(record.ascii()?);
                    }
                }
                RecordType::EndEl => return Ok(element),
                _ => {}
            }
        }
    }

    fn points(&self, element: &Element) -> Vec<DVec2> {
        element
            .xy
            .chunks_exact(2)
            .map(|pair| DVec2::new(pair[0] as f64, pair[1] as f64) * self.scale)
            .collect()
    }

    fn layer_key(
        element: &Element,
        kind: &'static str,
        offset: usize,
    ) -> Result<LayerKey, GdsError> {
        let layer = element.layer.ok_or(GdsError::MissingField {
            element: kind,
            field: "LAYER",
            offset,
        })?;

        Ok(LayerKey::new(layer as u16, element.datatype.unwrap_or(0) as u16))
    }

    fn boundary_shape(&self, element: &Element, offset: usize) -> Result<Option<Shape>, GdsError> {
        let layer = Self::layer_key(element, "BOUNDARY", offset)?;
        let mut polygon = self.points(element);

        // The ring is stored closed
        if polygon.len() > 1 && polygon.first() == polygon.last() {
            polygon.pop();
        }

        if polygon.len() < 3 {
            return Ok(None);
        }

        Ok(Some(Shape { layer, polygon }))
    }

    fn path_shape(&self, element: &Element, offset: usize) -> Result<Option<Shape>, GdsError> {
        let layer = Self::layer_key(element, "PATH", offset)?;
        let ends = PathEnds::from_pathtype(
            element.pathtype,
            element.begin_extension as f64 * self.scale,
            element.end_extension as f64 * self.scale,
        );
        let width = element.width as f64 * self.scale;

        let outline = path_outline(&self.points(element), width, ends);
        Ok(outline.map(|polygon| Shape { layer, polygon }))
    }

    fn reference_template(
        &self,
        element: &Element,
        kind: &'static str,
        offset: usize,
    ) -> Result<Reference, GdsError> {
        let target = element.sname.clone().ok_or(GdsError::MissingField {
            element: kind,
            field: "SNAME",
            offset,
        })?;

        Ok(Reference {
            rotation: element.angle,
            mirror_y: element.strans & STRANS_REFLECTION != 0,
            magnification: element.magnification.unwrap_or(1.0),
            display_name: element.display_name.clone(),
            ..Reference::new(target, DVec2::ZERO)
        })
    }

    fn structure_reference(
        &self,
        element: &Element,
        offset: usize,
    ) -> Result<Reference, GdsError> {
        let mut reference = self.reference_template(element, "SREF", offset)?;

        reference.origin = *self.points(element).first().ok_or(GdsError::MissingField {
            element: "SREF",
            field: "XY",
            offset,
        })?;

        Ok(reference)
    }

    /// Expands an array reference into one reference per lattice site.
    fn array_references(
        &self,
        element: &Element,
        offset: usize,
    ) -> Result<Vec<Reference>, GdsError> {
        let template = self.reference_template(element, "AREF", offset)?;
        let (cols, rows) = element.colrow.ok_or(GdsError::MissingField {
            element: "AREF",
            field: "COLROW",
            offset,
        })?;

        let points = self.points(element);
        let [origin, column_end, row_end] = points[..] else {
            return Err(GdsError::MissingField {
                element: "AREF",
                field: "XY",
                offset,
            });
        };

        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        let count = cols * rows;
        if count > MAX_ARRAY_REFERENCES {
            return Err(GdsError::ArrayTooLarge { count, offset });
        }

        let column_step = (column_end - origin) / cols as f64;
        let row_step = (row_end - origin) / rows as f64;

        let mut references = Vec::with_capacity(count);
        for row in 0..rows {
            for column in 0..cols {
                let mut reference = template.clone();
                reference.origin = origin + column_step * column as f64 + row_step * row as f64;
                references.push(reference);
            }
        }

        Ok(references)
    }
}

pub fn parse_gds(data: &[u8]) -> anyhow::Result<Layout> {
    GdsParser::new(data).parse()
}

pub fn read_gds(path: &Path) -> anyhow::Result<Layout> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_gds(&data).with_context(|| format!("Failed to parse GDSII file {}", path.display()))
}
