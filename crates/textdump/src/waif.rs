// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Waif identity across a single read or write.
//!
//! A waif is written in full the first time it is met (`c <n>`) and by index every time after
//! (`r <n>`). Both sides keep per-session state for this; nothing here is global.

use crate::model::Waif;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strum::{Display, EnumString};

/// How waif indices are chosen when writing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaifIndexMode {
    /// Number waifs 0, 1, 2... in the order they are first written. This is what the
    /// reference server produces and expects.
    #[default]
    Sequential,
    /// Keep the index each waif has in the database's waif table.
    Preserve,
}

/// What to emit for a waif on the write side.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interned {
    /// First sighting: write the full definition under this index.
    Define(usize),
    /// Already written: emit a reference to this index.
    Reference(usize),
}

#[derive(Debug, Default)]
pub struct WaifInterner {
    mode: WaifIndexMode,
    written: HashMap<usize, usize>,
    next_index: usize,
}

impl WaifInterner {
    pub fn new(mode: WaifIndexMode) -> Self {
        Self {
            mode,
            written: HashMap::new(),
            next_index: 0,
        }
    }

    /// Record that the waif stored at `original` is about to be written. The index is assigned
    /// before the waif's own properties are written, so a waif reachable from itself comes out
    /// as a reference.
    pub fn intern(&mut self, original: usize) -> Interned {
        if let Some(index) = self.written.get(&original) {
            return Interned::Reference(*index);
        }
        let index = match self.mode {
            WaifIndexMode::Sequential => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
            WaifIndexMode::Preserve => original,
        };
        self.written.insert(original, index);
        Interned::Define(index)
    }

    pub fn written_count(&self) -> usize {
        self.written.len()
    }
}

/// Read side: indices seen so far, and the waifs decoded under them.
#[derive(Debug, Default)]
pub struct WaifTable {
    started: HashSet<usize>,
    waifs: BTreeMap<usize, Waif>,
}

impl WaifTable {
    /// Mark an index as defined before its properties are read, so they may refer back to it.
    pub fn begin(&mut self, index: usize) {
        self.started.insert(index);
    }

    pub fn finish(&mut self, index: usize, waif: Waif) {
        self.waifs.insert(index, waif);
    }

    pub fn is_defined(&self, index: usize) -> bool {
        self.started.contains(&index)
    }

    pub fn into_waifs(self) -> BTreeMap<usize, Waif> {
        self.waifs
    }
}
