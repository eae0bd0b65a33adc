//! HDF5-backed container, behind the `hdf5` cargo feature.
//!
//! FAST5 compound tables are read through fixed memory layouts for the three
//! table shapes the extractors consume (detected events, basecalled events,
//! the 2D alignment); HDF5's compound conversion matches fields by name, so
//! extra on-disk columns are dropped and integer widths are widened as
//! needed. Scalar attributes are decoded dynamically from their on-disk
//! datatype.

use std::ffi::CString;
use std::mem::{offset_of, size_of};
use std::path::Path;

use hdf5::types::{
    CompoundField, CompoundType, FixedAscii, TypeDescriptor, VarLenAscii, VarLenUnicode,
};
use hdf5::H5Type;
use hdf5_sys::h5o::H5Ocopy;
use hdf5_sys::h5p::H5P_DEFAULT;

use super::{norm, Container, EventTable, Value, ANALYSES_PATH};
use crate::strip::StripStore;
use crate::Fast5Error;

const KMER_BYTES: usize = 5;

#[repr(C)]
struct DetectedEvent {
    start: i64,
    length: i64,
    mean: f64,
    stdv: f64,
}

unsafe impl H5Type for DetectedEvent {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::Compound(CompoundType {
            fields: vec![
                CompoundField::typed::<i64>("start", offset_of!(DetectedEvent, start), 0),
                CompoundField::typed::<i64>("length", offset_of!(DetectedEvent, length), 1),
                CompoundField::typed::<f64>("mean", offset_of!(DetectedEvent, mean), 2),
                CompoundField::typed::<f64>("stdv", offset_of!(DetectedEvent, stdv), 3),
            ],
            size: size_of::<DetectedEvent>(),
        })
    }
}

// "move" is a keyword, hence the manual impl instead of the derive
#[repr(C)]
struct CalledEvent {
    mean: f64,
    start: f64,
    stdv: f64,
    length: f64,
    model_state: FixedAscii<KMER_BYTES>,
    mv: i64,
}

unsafe impl H5Type for CalledEvent {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::Compound(CompoundType {
            fields: vec![
                CompoundField::typed::<f64>("mean", offset_of!(CalledEvent, mean), 0),
                CompoundField::typed::<f64>("start", offset_of!(CalledEvent, start), 1),
                CompoundField::typed::<f64>("stdv", offset_of!(CalledEvent, stdv), 2),
                CompoundField::typed::<f64>("length", offset_of!(CalledEvent, length), 3),
                CompoundField::typed::<FixedAscii<KMER_BYTES>>(
                    "model_state",
                    offset_of!(CalledEvent, model_state),
                    4,
                ),
                CompoundField::typed::<i64>("move", offset_of!(CalledEvent, mv), 5),
            ],
            size: size_of::<CalledEvent>(),
        })
    }
}

#[repr(C)]
struct AlignmentEntry {
    template: i64,
    complement: i64,
    kmer: FixedAscii<KMER_BYTES>,
}

unsafe impl H5Type for AlignmentEntry {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::Compound(CompoundType {
            fields: vec![
                CompoundField::typed::<i64>("template", offset_of!(AlignmentEntry, template), 0),
                CompoundField::typed::<i64>(
                    "complement",
                    offset_of!(AlignmentEntry, complement),
                    1,
                ),
                CompoundField::typed::<FixedAscii<KMER_BYTES>>(
                    "kmer",
                    offset_of!(AlignmentEntry, kmer),
                    2,
                ),
            ],
            size: size_of::<AlignmentEntry>(),
        })
    }
}

/// One open FAST5 file.
pub struct H5Container {
    file: hdf5::File,
}

impl H5Container {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Fast5Error> {
        Ok(Self {
            file: hdf5::File::open(path)?,
        })
    }

    fn decode_attr(attr: &hdf5::Attribute) -> Option<Value> {
        let desc = attr.dtype().ok()?.to_descriptor().ok()?;
        match desc {
            TypeDescriptor::Integer(_) => attr.read_scalar::<i64>().ok().map(Value::Int),
            TypeDescriptor::Unsigned(_) => attr
                .read_scalar::<u64>()
                .ok()
                .map(|v| Value::Int(v as i64)),
            TypeDescriptor::Float(_) => attr.read_scalar::<f64>().ok().map(Value::Float),
            TypeDescriptor::FixedAscii(_) | TypeDescriptor::VarLenAscii => attr
                .read_scalar::<VarLenAscii>()
                .ok()
                .map(|s| Value::Str(s.to_string())),
            TypeDescriptor::FixedUnicode(_) | TypeDescriptor::VarLenUnicode => attr
                .read_scalar::<VarLenUnicode>()
                .ok()
                .map(|s| Value::Str(s.to_string())),
            _ => None,
        }
    }

    fn find_attr(&self, path: &str, name: &str) -> Option<hdf5::Attribute> {
        if let Ok(group) = self.file.group(norm(path)) {
            return group.attr(name).ok();
        }
        self.file.dataset(norm(path)).ok()?.attr(name).ok()
    }
}

impl Container for H5Container {
    fn exists(&self, path: &str) -> bool {
        // check level by level: H5Lexists on a path with a missing
        // intermediate group is an error, not `false`
        let mut node = String::new();
        for part in norm(path).split('/').filter(|p| !p.is_empty()) {
            if !node.is_empty() {
                node.push('/');
            }
            node.push_str(part);
            if !self.file.link_exists(&node) {
                return false;
            }
        }
        true
    }

    fn attr(&self, path: &str, name: &str) -> Option<Value> {
        Self::decode_attr(&self.find_attr(path, name)?)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let Ok(group) = self.file.group(norm(path)) else {
            return Vec::new();
        };
        let mut names = group.member_names().unwrap_or_default();
        names.sort();
        names
    }

    fn table(&self, path: &str) -> Result<EventTable, Fast5Error> {
        let path = norm(path);
        let dataset = self.file.dataset(path)?;
        if path.ends_with("/Alignment") {
            let mut table = EventTable::new(vec!["template", "complement", "kmer"]);
            for entry in dataset.read_raw::<AlignmentEntry>()? {
                table.push_row(vec![
                    Value::Int(entry.template),
                    Value::Int(entry.complement),
                    Value::Str(entry.kmer.as_str().to_string()),
                ]);
            }
            Ok(table)
        } else if path.contains("EventDetection") {
            let mut table = EventTable::new(vec!["start", "length", "mean", "stdv"]);
            for event in dataset.read_raw::<DetectedEvent>()? {
                table.push_row(vec![
                    Value::Int(event.start),
                    Value::Int(event.length),
                    Value::Float(event.mean),
                    Value::Float(event.stdv),
                ]);
            }
            Ok(table)
        } else {
            let mut table =
                EventTable::new(vec!["mean", "start", "stdv", "length", "model_state", "move"]);
            for event in dataset.read_raw::<CalledEvent>()? {
                table.push_row(vec![
                    Value::Float(event.mean),
                    Value::Float(event.start),
                    Value::Float(event.stdv),
                    Value::Float(event.length),
                    Value::Str(event.model_state.as_str().to_string()),
                    Value::Int(event.mv),
                ]);
            }
            Ok(table)
        }
    }

    fn signal(&self, path: &str) -> Result<Vec<u16>, Fast5Error> {
        Ok(self.file.dataset(norm(path))?.read_raw::<u16>()?)
    }

    fn text(&self, path: &str) -> Result<String, Fast5Error> {
        let dataset = self.file.dataset(norm(path))?;
        if let Ok(s) = dataset.read_scalar::<VarLenAscii>() {
            return Ok(s.to_string());
        }
        Ok(dataset.read_scalar::<VarLenUnicode>()?.to_string())
    }
}

/// File-level strip backend over HDF5.
pub struct H5Store;

impl StripStore for H5Store {
    fn has_analyses(&self, path: &Path) -> Result<bool, Fast5Error> {
        let file = hdf5::File::open(path)?;
        Ok(file.link_exists(ANALYSES_PATH))
    }

    fn copy_stripped(&self, src: &Path, dst: &Path) -> Result<(), Fast5Error> {
        let file = hdf5::File::open(src)?;
        let out = hdf5::File::create(dst)?;
        for name in file.member_names()? {
            if name == ANALYSES_PATH {
                continue;
            }
            let c_name = CString::new(name.as_str())
                .map_err(|_| hdf5::Error::from("link name contains a NUL byte"))?;
            let status = unsafe {
                H5Ocopy(
                    file.id(),
                    c_name.as_ptr(),
                    out.id(),
                    c_name.as_ptr(),
                    H5P_DEFAULT,
                    H5P_DEFAULT,
                )
            };
            if status < 0 {
                return Err(hdf5::Error::from("H5Ocopy failed").into());
            }
        }
        for name in file.attr_names()? {
            let Some(value) = file.attr(&name).ok().as_ref().and_then(H5Container::decode_attr)
            else {
                log::warn!("{}: skipping root attribute {name}", src.display());
                continue;
            };
            match value {
                Value::Int(v) => out.new_attr::<i64>().create(name.as_str())?.write_scalar(&v)?,
                Value::Float(v) => out.new_attr::<f64>().create(name.as_str())?.write_scalar(&v)?,
                Value::Str(s) => {
                    let v: VarLenUnicode = s
                        .parse()
                        .map_err(|_| hdf5::Error::from("invalid attribute string"))?;
                    out.new_attr::<VarLenUnicode>()
                        .create(name.as_str())?
                        .write_scalar(&v)?
                }
            }
        }
        Ok(())
    }
}
