use crate::error::UnsplatError;
use foldhash::HashMap;
use foldhash::HashMapExt;

pub const MAGIC: &str = "ply";
pub const FORMAT_BINARY_LE: &str = "binary_little_endian";
pub const FORMAT_VERSION: &str = "1.0";
const END_HEADER: &str = "end_header";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::Int8),
            "uchar" | "uint8" => Some(Self::UInt8),
            "short" | "int16" => Some(Self::Int16),
            "ushort" | "uint16" => Some(Self::UInt16),
            "int" | "int32" => Some(Self::Int32),
            "uint" | "uint32" => Some(Self::UInt32),
            "float" | "float32" => Some(Self::Float32),
            "double" | "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    /// Variable-length list. Recognised so the header parses, never decoded.
    List { count: ScalarType, value: ScalarType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub count: usize,
    pub properties: Vec<Property>,
}

/// Location of a scalar property inside one row of its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub offset: usize,
    pub ty: ScalarType,
}

impl Element {
    /// Size in bytes of one row. Fails for elements carrying list properties,
    /// whose rows have no fixed width.
    pub fn stride(&self) -> Result<usize, UnsplatError> {
        self.properties.iter().try_fold(0usize, |acc, p| match p.kind {
            PropertyKind::Scalar(ty) => Ok(acc + ty.size()),
            PropertyKind::List { .. } => Err(UnsplatError::Schema(format!(
                "list property '{}' in element '{}' is not supported",
                p.name, self.name
            ))),
        })
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    /// Maps every property name to its byte offset within a row.
    pub fn slots(&self) -> Result<HashMap<&str, FieldSlot>, UnsplatError> {
        let mut slots = HashMap::with_capacity(self.properties.len());
        let mut offset = 0;
        for p in &self.properties {
            let PropertyKind::Scalar(ty) = p.kind else {
                return Err(UnsplatError::Schema(format!(
                    "list property '{}' in element '{}' is not supported",
                    p.name, self.name
                )));
            };
            slots.insert(p.name.as_str(), FieldSlot { offset, ty });
            offset += ty.size();
        }
        Ok(slots)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub format: String,
    pub version: String,
    pub elements: Vec<Element>,
}

impl Schema {
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn require_binary_le(&self) -> Result<(), UnsplatError> {
        if self.format != FORMAT_BINARY_LE {
            return Err(UnsplatError::Format(format!(
                "unsupported format '{}' (only {} is supported)",
                self.format, FORMAT_BINARY_LE
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(UnsplatError::Format(format!(
                "unsupported version '{}' (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

fn next_text_line<'b>(
    buffer: &'b [u8],
    offset: &mut usize,
) -> Result<Option<&'b str>, UnsplatError> {
    match next_line(buffer, offset) {
        Some(line) => std::str::from_utf8(line)
            .map(|s| Some(s.trim()))
            .map_err(|e| UnsplatError::Format(format!("UTF-8 error in header: {}", e))),
        None => Ok(None),
    }
}

fn parse_scalar(name: &str) -> Result<ScalarType, UnsplatError> {
    ScalarType::parse(name)
        .ok_or_else(|| UnsplatError::Schema(format!("unknown property type '{}'", name)))
}

/// Parses a PLY header.
///
/// Returns the schema and the byte offset of the first body byte, i.e. the
/// position right after the `end_header` line.
pub fn parse_header(raw_data: &[u8]) -> Result<(Schema, usize), UnsplatError> {
    let mut offset = 0;

    let magic = loop {
        match next_text_line(raw_data, &mut offset)? {
            Some("") => continue,
            Some(line) => break line,
            None => return Err(UnsplatError::Format("empty input".to_string())),
        }
    };
    if magic != MAGIC {
        return Err(UnsplatError::Format(
            "not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    let mut format: Option<(String, String)> = None;
    let mut elements: Vec<Element> = Vec::new();
    let mut current: Option<Element> = None;

    loop {
        let line = next_text_line(raw_data, &mut offset)?
            .ok_or_else(|| UnsplatError::Format("no 'end_header' found before EOF".to_string()))?;
        if line == END_HEADER {
            break;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&keyword) = parts.first() else {
            continue;
        };

        match keyword {
            "format" => {
                let [_, encoding, version, ..] = parts[..] else {
                    return Err(UnsplatError::Format(format!("malformed format line: '{}'", line)));
                };
                format = Some((encoding.to_string(), version.to_string()));
            }
            "element" => {
                let [_, name, count, ..] = parts[..] else {
                    return Err(UnsplatError::Format(format!("malformed element line: '{}'", line)));
                };
                let count: usize = count.parse().map_err(|e| {
                    UnsplatError::Format(format!("invalid count '{}' for element '{}': {}", count, name, e))
                })?;
                if let Some(done) = current.take() {
                    elements.push(done);
                }
                current = Some(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            "property" => {
                let element = current.as_mut().ok_or_else(|| {
                    UnsplatError::Format(format!("property before any element: '{}'", line))
                })?;
                let property = match parts[..] {
                    [_, "list", count, value, name, ..] => Property {
                        name: name.to_string(),
                        kind: PropertyKind::List {
                            count: parse_scalar(count)?,
                            value: parse_scalar(value)?,
                        },
                    },
                    [_, "list", ..] => {
                        return Err(UnsplatError::Format(format!(
                            "malformed list property line: '{}'",
                            line
                        )))
                    }
                    [_, ty, name, ..] => Property {
                        name: name.to_string(),
                        kind: PropertyKind::Scalar(parse_scalar(ty)?),
                    },
                    _ => {
                        return Err(UnsplatError::Format(format!(
                            "malformed property line: '{}'",
                            line
                        )))
                    }
                };
                element.properties.push(property);
            }
            "comment" | "obj_info" => {}
            other => {
                log::debug!("Ignoring unknown header keyword '{}'", other);
            }
        }
    }

    if let Some(done) = current.take() {
        elements.push(done);
    }
    let (format, version) =
        format.ok_or_else(|| UnsplatError::Format("missing format line".to_string()))?;

    Ok((
        Schema {
            format,
            version,
            elements,
        },
        offset,
    ))
}
