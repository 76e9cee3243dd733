//! Field-level access to SSZ containers.
//!
//! Era files hold fork-dependent consensus containers. Rather than modelling every consensus
//! type, containers are split into their raw field slices from a layout description, and only
//! the fields the execution side needs are decoded.

use crate::DecodeError;
use alloy_primitives::B256;
use ssz::{BYTES_PER_LENGTH_OFFSET, SszDecoderBuilder};

/// The SSZ shape of one container field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    /// A fixed-size field of the given length.
    Fixed(usize),
    /// A variable-size field, stored behind an offset.
    Var,
}

/// Splits `bytes` into one slice per field of `layout`.
pub(crate) fn split_container<'a>(
    bytes: &'a [u8],
    layout: &[Field],
) -> Result<Vec<&'a [u8]>, DecodeError> {
    let mut builder = SszDecoderBuilder::new(bytes);
    for field in layout {
        match field {
            Field::Fixed(len) => builder.register_type_parameterized(true, *len)?,
            Field::Var => builder.register_type_parameterized(false, BYTES_PER_LENGTH_OFFSET)?,
        }
    }
    let mut decoder = builder.build()?;
    let mut fields = Vec::with_capacity(layout.len());
    for _ in layout {
        fields.push(decoder.decode_next_with(|slice| Ok(slice))?);
    }
    Ok(fields)
}

/// Splits an SSZ list of variable-size byte strings.
pub(crate) fn split_byte_lists(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    Ok(ssz::decode_list_of_variable_length_items::<Vec<u8>, Vec<Vec<u8>>>(bytes, None)?)
}

/// Splits an SSZ list of fixed-size items of `item_len` bytes.
pub(crate) fn split_fixed_list(bytes: &[u8], item_len: usize) -> Result<Vec<&[u8]>, DecodeError> {
    if bytes.len() % item_len != 0 {
        return Err(DecodeError::Field("list length is not a multiple of the item size"));
    }
    Ok(bytes.chunks_exact(item_len).collect())
}

/// Reads a little-endian `u64` field.
pub(crate) fn read_u64(field: &[u8]) -> Result<u64, DecodeError> {
    let bytes: [u8; 8] =
        field.try_into().map_err(|_| DecodeError::Field("expected an 8 byte integer"))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Reads a 32 byte root field.
pub(crate) fn read_root(field: &[u8]) -> Result<B256, DecodeError> {
    B256::try_from(field).map_err(|_| DecodeError::Field("expected a 32 byte root"))
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod encode {
    //! Container encoding for fixtures.

    use ssz::BYTES_PER_LENGTH_OFFSET;

    /// One encoded field value.
    #[derive(Debug, Clone)]
    pub(crate) enum Value {
        Fixed(Vec<u8>),
        Var(Vec<u8>),
    }

    /// Encodes a container from its field values.
    pub(crate) fn container(values: Vec<Value>) -> Vec<u8> {
        let fixed_len: usize = values
            .iter()
            .map(|v| match v {
                Value::Fixed(bytes) => bytes.len(),
                Value::Var(_) => BYTES_PER_LENGTH_OFFSET,
            })
            .sum();
        let mut fixed = Vec::with_capacity(fixed_len);
        let mut variable = Vec::new();
        for value in values {
            match value {
                Value::Fixed(bytes) => fixed.extend_from_slice(&bytes),
                Value::Var(bytes) => {
                    let offset = (fixed_len + variable.len()) as u32;
                    fixed.extend_from_slice(&offset.to_le_bytes());
                    variable.extend_from_slice(&bytes);
                }
            }
        }
        fixed.extend_from_slice(&variable);
        fixed
    }

    /// Encodes a list of variable-size byte strings.
    pub(crate) fn byte_lists(items: &[Vec<u8>]) -> Vec<u8> {
        ssz::Encode::as_ssz_bytes(&items.to_vec())
    }
}
