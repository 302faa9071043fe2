// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Navigation helpers over dynamically decoded storage and event values.
//!
//! Storage reads go through `subxt`'s dynamic API, which yields
//! `scale_value::Value` trees whose exact shape depends on the runtime
//! metadata. These helpers extract the handful of shapes the tracker needs:
//! unsigned integers (with newtype unwrapping, e.g. `Perbill`), named
//! fields, sequences, and 32-byte account ids.

use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

/// Look up a named composite field.
pub fn field<'a, T>(value: &'a Value<T>, name: &str) -> Option<&'a Value<T>> {
    match &value.value {
        ValueDef::Composite(Composite::Named(fields)) => {
            fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
        }
        _ => None,
    }
}

/// Collect the members of a composite (named or unnamed) in order.
pub fn items<T>(value: &Value<T>) -> Option<Vec<&Value<T>>> {
    match &value.value {
        ValueDef::Composite(Composite::Named(fields)) => {
            Some(fields.iter().map(|(_, v)| v).collect())
        }
        ValueDef::Composite(Composite::Unnamed(values)) => Some(values.iter().collect()),
        _ => None,
    }
}

/// Extract an unsigned integer, unwrapping single-field newtype wrappers
/// such as `Perbill` or `RewardPoint`.
pub fn as_u128<T>(value: &Value<T>) -> Option<u128> {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) => Some(*n),
        ValueDef::Composite(_) => {
            let inner = items(value)?;
            if inner.len() == 1 {
                as_u128(inner[0])
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Extract a 32-byte account id from an arbitrarily nested composite.
pub fn account_bytes<T>(value: &Value<T>) -> Option<[u8; 32]> {
    let mut bytes = Vec::with_capacity(32);
    collect_bytes(value, &mut bytes);
    <[u8; 32]>::try_from(bytes.as_slice()).ok()
}

fn collect_bytes<T>(value: &Value<T>, out: &mut Vec<u8>) {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) if *n <= u8::MAX as u128 => out.push(*n as u8),
        ValueDef::Composite(Composite::Named(fields)) => {
            for (_, v) in fields {
                collect_bytes(v, out);
            }
        }
        ValueDef::Composite(Composite::Unnamed(values)) => {
            for v in values {
                collect_bytes(v, out);
            }
        }
        _ => {}
    }
}
