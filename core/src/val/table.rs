use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow};

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

use super::Val;

/// Normalized table key.
///
/// Float keys with an exact integer value collapse onto the integer key, so
/// `t[1]` and `t[1.0]` address the same slot. Reference values (tables,
/// functions, userdata, threads) key by identity; the original value is kept
/// alive alongside the address.
#[derive(Debug, Clone)]
pub enum TKey {
    Int(i64),
    Num(u64),
    Str(Arc<str>),
    Bool(bool),
    Ref(RefKey),
}

#[derive(Debug, Clone)]
pub struct RefKey {
    addr: usize,
    // Keeps the referent alive for as long as the key exists.
    _keep: Val,
}

impl TKey {
    pub fn from_val(key: &Val) -> Result<TKey> {
        match key {
            Val::Nil => Err(anyhow!("table index is nil")),
            Val::Bool(b) => Ok(TKey::Bool(*b)),
            Val::Int(i) => Ok(TKey::Int(*i)),
            Val::Float(f) => {
                if f.is_nan() {
                    return Err(anyhow!("table index is NaN"));
                }
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(TKey::Int(*f as i64))
                } else {
                    Ok(TKey::Num(f.to_bits()))
                }
            }
            Val::Str(s) => Ok(TKey::Str(s.clone())),
            other => Ok(TKey::Ref(RefKey {
                addr: other.identity_addr(),
                _keep: other.clone(),
            })),
        }
    }
}

impl PartialEq for TKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TKey::Int(a), TKey::Int(b)) => a == b,
            (TKey::Num(a), TKey::Num(b)) => a == b,
            (TKey::Str(a), TKey::Str(b)) => a == b,
            (TKey::Bool(a), TKey::Bool(b)) => a == b,
            (TKey::Ref(a), TKey::Ref(b)) => a.addr == b.addr,
            _ => false,
        }
    }
}

impl Eq for TKey {}

impl Hash for TKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            TKey::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            TKey::Num(bits) => {
                1u8.hash(state);
                bits.hash(state);
            }
            TKey::Str(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            TKey::Bool(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            TKey::Ref(r) => {
                4u8.hash(state);
                r.addr.hash(state);
            }
        }
    }
}

#[derive(Debug)]
struct TableData {
    map: FastHashMap<TKey, Val>,
    meta: Option<Arc<Table>>,
}

/// The associative table. Raw accessors never consult the metatable; all
/// metamethod behavior lives in the dispatch layer.
///
/// Interior mutability uses a lock so tables can move between host threads,
/// but the engine contract remains single-writer-at-a-time per object; the
/// lock is not a license for concurrent script mutation.
#[derive(Debug)]
pub struct Table {
    data: RwLock<TableData>,
}

impl Table {
    pub fn new() -> Arc<Table> {
        Arc::new(Table {
            data: RwLock::new(TableData {
                map: fast_hash_map_new(),
                meta: None,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TableData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw read; nil for an absent key. Nil and NaN keys read as absent.
    pub fn raw_get(&self, key: &Val) -> Val {
        let Ok(k) = TKey::from_val(key) else {
            return Val::Nil;
        };
        self.read().map.get(&k).cloned().unwrap_or(Val::Nil)
    }

    /// Raw write. Assigning nil removes the entry; nil/NaN keys are errors.
    pub fn raw_set(&self, key: &Val, value: Val) -> Result<()> {
        let k = TKey::from_val(key)?;
        let mut data = self.write();
        if matches!(value, Val::Nil) {
            data.map.remove(&k);
        } else {
            data.map.insert(k, value);
        }
        Ok(())
    }

    /// Convenience for string-keyed writes (globals, metamethod tables).
    pub fn set_str(&self, key: &str, value: Val) {
        // Str keys are never nil/NaN, so this cannot fail.
        let _ = self.raw_set(&Val::Str(Arc::from(key)), value);
    }

    pub fn get_str(&self, key: &str) -> Val {
        self.raw_get(&Val::Str(Arc::from(key)))
    }

    /// A border of the integer sequence: the largest `n` such that keys
    /// `1..=n` are all present.
    pub fn raw_len(&self) -> i64 {
        let data = self.read();
        let mut n = 0i64;
        while data.map.contains_key(&TKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    pub fn len_entries(&self) -> usize {
        self.read().map.len()
    }

    pub fn metatable(&self) -> Option<Arc<Table>> {
        self.read().meta.clone()
    }

    pub fn set_metatable(&self, meta: Option<Arc<Table>>) {
        self.write().meta = meta;
    }

    /// Snapshot of entries for serialization and iteration helpers.
    pub fn entries(&self) -> Vec<(TKey, Val)> {
        self.read().map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
