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

//! Representation of the objects, verbs, properties, waifs and tasks held in a textdump.

use crate::error::DanglingReference;
use crate::version::{CURRENT_VERSION, DbVersion};
use moodb_var::{NOTHING, Objid, Var, v_empty_map, v_int, v_obj};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use strum::{Display, EnumString};
use tracing::{debug, warn};

/// Default `max_stackframes` for VM headers that predate the field.
pub const DEFAULT_MAX_STACKFRAMES: i64 = 50;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
pub enum LineEnding {
    #[default]
    #[serde(rename = "lf")]
    #[strum(serialize = "lf")]
    Lf,
    #[serde(rename = "crlf")]
    #[strum(serialize = "crlf")]
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Verb {
    pub name: String,
    pub owner: Objid,
    pub perms: i64,
    pub prep: i64,
    /// The object the verb is defined on.
    pub object: Objid,
    /// `None` when the database carries no program for this verb, `Some(vec![])` when it carries
    /// an empty one. The two are written differently.
    pub code: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Var,
    pub owner: Objid,
    pub perms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MooObject {
    pub id: i64,
    pub name: String,
    pub flags: i64,
    pub owner: Objid,
    pub location: Var,
    pub last_move: Var,
    pub parents: Vec<Objid>,
    pub children: Vec<Objid>,
    pub contents: Vec<Objid>,
    pub verbs: Vec<Verb>,
    /// Property values in slot order: the object's own definitions first, then inherited slots.
    pub properties: Vec<Property>,
    /// How many leading entries of `properties` are defined on this object.
    pub propdefs_count: usize,
    pub anon: bool,
}

impl MooObject {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            flags: 0,
            owner: NOTHING,
            location: v_obj(NOTHING.0),
            last_move: v_obj(NOTHING.0),
            parents: vec![NOTHING],
            children: vec![],
            contents: vec![],
            verbs: vec![],
            properties: vec![],
            propdefs_count: 0,
            anon: false,
        }
    }

    pub fn objid(&self) -> Objid {
        Objid(self.id)
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & (1 << flag) != 0
    }

    pub fn defined_properties(&self) -> &[Property] {
        &self.properties[..self.propdefs_count.min(self.properties.len())]
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Waif {
    pub class: Objid,
    pub owner: Objid,
    pub propdefs_length: i64,
    /// Slots that hold a value, in the order written.
    pub props: Vec<(i64, Var)>,
}

/// The parse-info portion of an activation. Queued tasks carry only this; suspended and
/// interrupted frames carry it inside a full [`Activation`].
#[derive(Clone, Debug, PartialEq)]
pub struct ActivationInfo {
    pub temp_value: Var,
    pub temp_this: Var,
    pub temp_vloc: Var,
    pub threaded: i64,
    pub this: i64,
    pub unused1: i64,
    pub unused2: i64,
    pub player: i64,
    pub unused3: i64,
    pub programmer: i64,
    pub vloc: i64,
    pub unused4: i64,
    pub debug: i64,
    pub verb: String,
    pub verbname: String,
}

impl Default for ActivationInfo {
    fn default() -> Self {
        Self {
            temp_value: v_int(-111),
            temp_this: v_obj(NOTHING.0),
            temp_vloc: v_obj(NOTHING.0),
            threaded: 0,
            this: NOTHING.0,
            unused1: -7,
            unused2: -8,
            player: NOTHING.0,
            unused3: -9,
            programmer: NOTHING.0,
            vloc: NOTHING.0,
            unused4: -10,
            debug: 0,
            verb: String::new(),
            verbname: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub lang_version: i64,
    pub code: Vec<String>,
    pub rt_env: Vec<(String, Var)>,
    pub stack: Vec<Var>,
    pub info: ActivationInfo,
    pub temp_end: Var,
    pub pc: i64,
    pub bi_func_pc: i64,
    pub error_pc: i64,
    /// Name of the builtin the frame was suspended in, present when `bi_func_pc != 0`.
    pub bi_func_name: Option<String>,
}

impl Default for Activation {
    fn default() -> Self {
        Self {
            lang_version: CURRENT_VERSION.number() as i64,
            code: vec![],
            rt_env: vec![],
            stack: vec![],
            info: ActivationInfo::default(),
            temp_end: v_int(0),
            pc: 0,
            bi_func_pc: 0,
            error_pc: 0,
            bi_func_name: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vm {
    pub locals: Var,
    pub vector: i64,
    pub func_id: i64,
    pub max_stackframes: i64,
    /// Bottom of the stack first. The header's `top` is `stack.len() - 1`.
    pub stack: Vec<Activation>,
}

impl Default for Vm {
    fn default() -> Self {
        Self {
            locals: v_empty_map(),
            vector: 0,
            func_id: 0,
            max_stackframes: DEFAULT_MAX_STACKFRAMES,
            stack: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueuedTask {
    pub unused: i64,
    pub first_lineno: i64,
    pub start_time: i64,
    pub id: i64,
    pub activation: ActivationInfo,
    pub rt_env: Vec<(String, Var)>,
    pub code: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SuspendedTask {
    pub start_time: i64,
    pub id: i64,
    /// The value the task resumes with, when one was stored.
    pub value: Option<Var>,
    pub vm: Vm,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterruptedTask {
    pub id: i64,
    pub status: String,
    pub vm: Vm,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MooDatabase {
    pub version: DbVersion,
    pub version_string: String,
    pub total_objects: usize,
    pub total_verbs: usize,
    pub total_players: usize,
    pub objects: BTreeMap<i64, MooObject>,
    pub waifs: BTreeMap<usize, Waif>,
    pub players: Vec<Objid>,
    pub recycled_objects: BTreeSet<i64>,
    pub pending_anon_ids: Vec<i64>,
    pub clocks: Vec<String>,
    pub queued_tasks: Vec<QueuedTask>,
    pub suspended_tasks: Vec<SuspendedTask>,
    pub interrupted_tasks: Vec<InterruptedTask>,
    pub connections: Vec<String>,
    pub connections_with_listeners: bool,
    pub line_ending: LineEnding,
}

impl Default for MooDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MooDatabase {
    pub fn new() -> Self {
        Self {
            version: CURRENT_VERSION,
            version_string: CURRENT_VERSION.banner(),
            total_objects: 0,
            total_verbs: 0,
            total_players: 0,
            objects: BTreeMap::new(),
            waifs: BTreeMap::new(),
            players: vec![],
            recycled_objects: BTreeSet::new(),
            pending_anon_ids: vec![],
            clocks: vec![],
            queued_tasks: vec![],
            suspended_tasks: vec![],
            interrupted_tasks: vec![],
            connections: vec![],
            connections_with_listeners: false,
            line_ending: LineEnding::Lf,
        }
    }

    /// Anonymous objects live outside the dense id range, or are explicitly marked.
    pub fn is_anonymous(&self, obj: &MooObject) -> bool {
        obj.anon || obj.id < 0 || obj.id as usize >= self.total_objects
    }

    /// Objects that occupy a slot in the dense object table.
    pub fn dense_objects(&self) -> impl Iterator<Item = &MooObject> {
        self.objects.values().filter(|o| {
            !self.is_anonymous(o) && !self.recycled_objects.contains(&o.id)
        })
    }

    pub fn anonymous_objects(&self) -> impl Iterator<Item = &MooObject> {
        self.objects.values().filter(|o| self.is_anonymous(o))
    }

    /// The order objects (and so verb programs) are written in.
    pub fn objects_in_write_order(&self) -> Vec<&MooObject> {
        self.dense_objects().chain(self.anonymous_objects()).collect()
    }

    /// Every slot below `total_objects` is either a live object or recycled, never both.
    pub fn object_count_consistent(&self) -> bool {
        let recycled = self
            .recycled_objects
            .iter()
            .filter(|id| **id >= 0 && (**id as usize) < self.total_objects)
            .count();
        self.dense_objects().count() + recycled == self.total_objects
    }

    /// Number of verbs that carry a program.
    pub fn program_count(&self) -> usize {
        self.objects_in_write_order()
            .iter()
            .flat_map(|o| o.verbs.iter())
            .filter(|v| v.code.is_some())
            .count()
    }

    /// Whether an object reference points at something the database declares. Negative ids are
    /// sentinels and always fine.
    pub fn declares(&self, target: Objid) -> bool {
        if target.is_sentinel() {
            return true;
        }
        (target.0 as usize) < self.total_objects
            || self.objects.get(&target.0).is_some_and(|o| o.anon)
    }

    /// Collect object references in object fields and the player list that name no declared
    /// object.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut found = vec![];
        let mut check = |target: Objid, path: &dyn Fn() -> String| {
            if !self.declares(target) {
                found.push(DanglingReference {
                    target,
                    path: path(),
                });
            }
        };

        for (i, player) in self.players.iter().enumerate() {
            check(*player, &|| format!("players[{i}]"));
        }
        for obj in self.objects.values() {
            let id = obj.id;
            check(obj.owner, &|| format!("#{id}.owner"));
            if let Var::Obj(o) = &obj.location {
                check(*o, &|| format!("#{id}.location"));
            }
            if let Var::Obj(o) = &obj.last_move {
                check(*o, &|| format!("#{id}.last_move"));
            }
            for (i, o) in obj.parents.iter().enumerate() {
                check(*o, &|| format!("#{id}.parents[{i}]"));
            }
            for (i, o) in obj.children.iter().enumerate() {
                check(*o, &|| format!("#{id}.children[{i}]"));
            }
            for (i, o) in obj.contents.iter().enumerate() {
                check(*o, &|| format!("#{id}.contents[{i}]"));
            }
            for (i, v) in obj.verbs.iter().enumerate() {
                check(v.owner, &|| format!("#{id}.verbs[{i}].owner"));
            }
            for (i, p) in obj.properties.iter().enumerate() {
                check(p.owner, &|| format!("#{id}.properties[{i}].owner"));
            }
        }
        found
    }

    /// All ancestors of an object, depth first along each parent list, each listed once.
    pub fn ancestors(&self, id: i64) -> Vec<i64> {
        let mut seen = HashSet::from([id]);
        let mut result = vec![];
        let mut stack: Vec<i64> = vec![];
        if let Some(obj) = self.objects.get(&id) {
            stack.extend(obj.parents.iter().rev().map(|p| p.0));
        }
        while let Some(next) = stack.pop() {
            if next < 0 || !seen.insert(next) {
                continue;
            }
            let Some(obj) = self.objects.get(&next) else {
                continue;
            };
            result.push(next);
            stack.extend(obj.parents.iter().rev().map(|p| p.0));
        }
        result
    }

    /// Fill in the names of inherited property slots. The file only names the slots an object
    /// defines itself; inherited ones follow in the order of the ancestors' own definitions.
    ///
    /// Returns the number of objects whose slot count disagreed with their ancestry; those are
    /// left unnamed.
    pub fn resolve_property_names(&mut self) -> usize {
        let mut resolved = vec![];
        let mut unresolved = 0;
        for obj in self.objects.values() {
            if obj.properties.len() <= obj.propdefs_count {
                continue;
            }
            let inherited: Vec<String> = self
                .ancestors(obj.id)
                .iter()
                .filter_map(|a| self.objects.get(a))
                .flat_map(|a| a.defined_properties().iter().map(|p| p.name.clone()))
                .collect();
            if inherited.len() + obj.propdefs_count != obj.properties.len() {
                warn!(
                    "#{}: {} property slots but {} defined along its ancestry; leaving inherited names unresolved",
                    obj.id,
                    obj.properties.len(),
                    inherited.len() + obj.propdefs_count
                );
                unresolved += 1;
                continue;
            }
            resolved.push((obj.id, inherited));
        }
        for (id, names) in resolved {
            let Some(obj) = self.objects.get_mut(&id) else {
                continue;
            };
            let start = obj.propdefs_count;
            for (prop, name) in obj.properties[start..].iter_mut().zip(names) {
                prop.name = name;
            }
            debug!("#{id}: resolved {} inherited property names", obj.properties.len() - start);
        }
        unresolved
    }
}
