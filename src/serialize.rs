use crate::memory::Mmu;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Formatter;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error serializing/deserializing state: {source}")]
    Serialization {
        #[from]
        source: bincode::Error,
    },
    #[error("error reading/writing state: {source}")]
    FileSystem {
        #[from]
        source: io::Error,
    },
}

pub fn serialize_array<S, T, const N: usize>(
    array: &[T; N],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut state = serializer.serialize_tuple(N)?;
    for value in array {
        state.serialize_element(value)?;
    }
    state.end()
}

struct FixedArrayVisitor<T, const N: usize> {
    marker: PhantomData<T>,
}

impl<'de, T, const N: usize> Visitor<'de> for FixedArrayVisitor<T, N>
where
    T: Deserialize<'de> + Default + Copy,
{
    type Value = [T; N];

    fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "a sequence of exactly {N} elements")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut array = [T::default(); N];

        for (i, slot) in array.iter_mut().enumerate() {
            *slot = seq.next_element()?.ok_or_else(|| {
                de::Error::custom(format!("sequence ended after {i} of {N} elements"))
            })?;
        }

        if seq.next_element::<T>()?.is_some() {
            return Err(de::Error::custom(format!("sequence continues past {N} elements")));
        }

        Ok(array)
    }
}

pub fn deserialize_array<'de, D, T, const N: usize>(deserializer: D) -> Result<[T; N], D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + Copy,
{
    deserializer.deserialize_tuple(N, FixedArrayVisitor { marker: PhantomData })
}

pub fn determine_save_state_path<P: AsRef<Path>>(rom_file_path: P) -> PathBuf {
    rom_file_path.as_ref().with_extension("ss0")
}

pub fn save_state<P>(mmu: &Mmu, path: P) -> Result<(), SaveStateError>
where
    P: AsRef<Path>,
{
    let serialized = bincode::serialize(mmu)?;
    fs::write(path.as_ref(), serialized)?;

    log::info!("wrote save state to '{}'", path.as_ref().display());

    Ok(())
}

pub fn load_state<P>(path: P, existing: Mmu) -> Result<Mmu, (SaveStateError, Box<Mmu>)>
where
    P: AsRef<Path>,
{
    let serialized = match fs::read(path.as_ref()) {
        Ok(serialized) => serialized,
        Err(err) => {
            return Err((err.into(), Box::new(existing)));
        }
    };
    let mut mmu: Mmu = match bincode::deserialize(&serialized) {
        Ok(mmu) => mmu,
        Err(err) => {
            return Err((err.into(), Box::new(existing)));
        }
    };

    mmu.move_unserializable_fields_from(existing);

    log::info!("loaded save state from '{}'", path.as_ref().display());

    Ok(mmu)
}
