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

//! Deep comparison of two decoded databases.
//!
//! Sequences are compared position by position, maps over the union of their keys, properties by
//! name and verbs by position (verb names may repeat). The walk never fails; anything that does
//! not line up becomes a [`Diff`].

use crate::diff::{Diff, DiffKind};
use crate::path::DiffPath;
use moodb_textdump::{
    Activation, ActivationInfo, InterruptedTask, MooDatabase, MooObject, Property, QueuedTask,
    SuspendedTask, Verb, Vm, Waif,
};
use moodb_var::{Var, floats_close};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use tracing::debug;

/// Names accepted in [`CompareOptions::ignore_fields`].
pub const TOP_LEVEL_FIELDS: &[&str] = &[
    "version",
    "versionstring",
    "total_objects",
    "players",
    "recycled_objects",
    "pending_anon_ids",
    "objects",
    "waifs",
    "clocks",
    "queued_tasks",
    "suspended_tasks",
    "interrupted_tasks",
    "connections",
];

#[derive(Clone, Debug, Default)]
pub struct CompareOptions {
    /// Top-level fields to skip entirely.
    pub ignore_fields: HashSet<String>,
    /// Stop once this many differences have been found.
    pub max_diffs: Option<usize>,
}

impl CompareOptions {
    pub fn ignoring(fields: &[&str]) -> Self {
        Self {
            ignore_fields: fields.iter().map(|f| f.to_string()).collect(),
            max_diffs: None,
        }
    }
}

/// Every difference found between two databases, in walk order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompareResult {
    diffs: Vec<Diff>,
}

impl CompareResult {
    pub fn identical(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn diffs(&self) -> &[Diff] {
        &self.diffs
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diff> {
        self.diffs.iter()
    }

    pub fn filter_by_kind(&self, kind: DiffKind) -> Vec<&Diff> {
        self.diffs.iter().filter(|d| d.kind == kind).collect()
    }

    pub fn filter_by_path_prefix(&self, prefix: &str) -> Vec<&Diff> {
        self.diffs
            .iter()
            .filter(|d| d.path.to_string().starts_with(prefix))
            .collect()
    }

    /// Count of differences per kind, kinds listed in the order they were first seen.
    pub fn summary(&self) -> String {
        if self.identical() {
            return "Databases are identical".to_string();
        }
        let mut by_kind: Vec<(DiffKind, usize)> = vec![];
        for diff in &self.diffs {
            match by_kind.iter_mut().find(|(kind, _)| *kind == diff.kind) {
                Some((_, count)) => *count += 1,
                None => by_kind.push((diff.kind, 1)),
            }
        }
        let mut lines = vec![format!("Found {} difference(s):", self.diffs.len())];
        for (kind, count) in by_kind {
            lines.push(format!("  {kind}: {count}"));
        }
        lines.join("\n")
    }

    /// The summary followed by up to `max_diffs` numbered differences.
    pub fn report(&self, max_diffs: usize) -> String {
        if self.identical() {
            return "Databases are identical".to_string();
        }
        let mut lines = vec![self.summary(), String::new()];
        for (i, diff) in self.diffs.iter().take(max_diffs).enumerate() {
            lines.push(format!("  {}. {diff}", i + 1));
        }
        if self.diffs.len() > max_diffs {
            lines.push(format!("  ... and {} more", self.diffs.len() - max_diffs));
        }
        lines.join("\n")
    }
}

impl<'a> IntoIterator for &'a CompareResult {
    type Item = &'a Diff;
    type IntoIter = std::slice::Iter<'a, Diff>;

    fn into_iter(self) -> Self::IntoIter {
        self.diffs.iter()
    }
}

/// Compare `actual` against `expected`.
pub fn compare_databases(
    expected: &MooDatabase,
    actual: &MooDatabase,
    options: &CompareOptions,
) -> CompareResult {
    let wants = |field: &str| !options.ignore_fields.contains(field);
    let mut c = Comparator::new(options.max_diffs);
    let root = DiffPath::root();

    if wants("version") {
        c.scalar(
            &root,
            "version",
            &expected.version.number(),
            &actual.version.number(),
        );
    }
    if wants("versionstring") {
        c.text(
            &root,
            "versionstring",
            &expected.version_string,
            &actual.version_string,
        );
    }
    if wants("total_objects") {
        c.scalar(
            &root,
            "total_objects",
            &expected.total_objects,
            &actual.total_objects,
        );
    }
    if wants("players") {
        c.plain(&root.name("players"), &expected.players, &actual.players);
    }
    if wants("recycled_objects") {
        let expected: Vec<i64> = expected.recycled_objects.iter().copied().collect();
        let actual: Vec<i64> = actual.recycled_objects.iter().copied().collect();
        c.plain(&root.name("recycled_objects"), &expected, &actual);
    }
    if wants("pending_anon_ids") {
        c.plain(
            &root.name("pending_anon_ids"),
            &expected.pending_anon_ids,
            &actual.pending_anon_ids,
        );
    }
    if wants("objects") {
        c.objects(expected, actual);
    }
    if wants("waifs") {
        c.waifs(&expected.waifs, &actual.waifs);
    }
    if wants("clocks") {
        c.lines(&root, "clocks", &expected.clocks, &actual.clocks);
    }
    if wants("queued_tasks") {
        c.sequence(
            &root.name("queued_tasks"),
            &expected.queued_tasks,
            &actual.queued_tasks,
            |t| format!("task {}", t.id),
            |c, path, e, a| c.queued_task(&path, e, a),
        );
    }
    if wants("suspended_tasks") {
        c.sequence(
            &root.name("suspended_tasks"),
            &expected.suspended_tasks,
            &actual.suspended_tasks,
            |t| format!("task {}", t.id),
            |c, path, e, a| c.suspended_task(&path, e, a),
        );
    }
    if wants("interrupted_tasks") {
        c.sequence(
            &root.name("interrupted_tasks"),
            &expected.interrupted_tasks,
            &actual.interrupted_tasks,
            |t| format!("task {}", t.id),
            |c, path, e, a| c.interrupted_task(&path, e, a),
        );
    }
    if wants("connections") {
        c.lines(
            &root,
            "connections",
            &expected.connections,
            &actual.connections,
        );
        c.scalar(
            &root,
            "connections_with_listeners",
            &expected.connections_with_listeners,
            &actual.connections_with_listeners,
        );
    }

    debug!(diffs = c.diffs.len(), "Compared databases");
    CompareResult { diffs: c.diffs }
}

/// Compare two values on their own, as they would be compared inside a database.
pub fn compare_values(path: &DiffPath, expected: &Var, actual: &Var) -> Vec<Diff> {
    let mut c = Comparator::new(None);
    c.values(path.clone(), expected, actual);
    c.diffs
}

struct Comparator {
    diffs: Vec<Diff>,
    max_diffs: Option<usize>,
}

impl Comparator {
    fn new(max_diffs: Option<usize>) -> Self {
        Self {
            diffs: vec![],
            max_diffs,
        }
    }

    fn full(&self) -> bool {
        self.max_diffs.is_some_and(|max| self.diffs.len() >= max)
    }

    fn record(
        &mut self,
        path: DiffPath,
        kind: DiffKind,
        expected: Option<String>,
        actual: Option<String>,
    ) {
        if !self.full() {
            self.diffs.push(Diff::new(path, kind, expected, actual));
        }
    }

    fn changed(&mut self, path: DiffPath, expected: impl Display, actual: impl Display) {
        self.record(
            path,
            DiffKind::ValueChanged,
            Some(expected.to_string()),
            Some(actual.to_string()),
        );
    }

    fn scalar<T: PartialEq + Display>(
        &mut self,
        path: &DiffPath,
        field: &str,
        expected: &T,
        actual: &T,
    ) {
        if expected != actual {
            self.changed(path.name(field), expected, actual);
        }
    }

    fn text(&mut self, path: &DiffPath, field: &str, expected: &str, actual: &str) {
        if expected != actual {
            self.changed(
                path.name(field),
                format!("{expected:?}"),
                format!("{actual:?}"),
            );
        }
    }

    /// Position-by-position comparison: a length record when the sizes differ, `element` for
    /// each shared position, then the tail of the longer side as missing or extra.
    fn sequence<T>(
        &mut self,
        path: &DiffPath,
        expected: &[T],
        actual: &[T],
        render: impl Fn(&T) -> String,
        mut element: impl FnMut(&mut Self, DiffPath, &T, &T),
    ) {
        if expected.len() != actual.len() {
            self.record(
                path.clone(),
                DiffKind::LengthMismatch,
                Some(expected.len().to_string()),
                Some(actual.len().to_string()),
            );
        }
        for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
            if self.full() {
                return;
            }
            element(self, path.index(i), e, a);
        }
        for (i, e) in expected.iter().enumerate().skip(actual.len()) {
            self.record(path.index(i), DiffKind::Missing, Some(render(e)), None);
        }
        for (i, a) in actual.iter().enumerate().skip(expected.len()) {
            self.record(path.index(i), DiffKind::Extra, None, Some(render(a)));
        }
    }

    /// Both sides may be absent; absent on exactly one side is a changed value.
    fn optional<T>(
        &mut self,
        path: DiffPath,
        expected: Option<&T>,
        actual: Option<&T>,
        render: impl Fn(&T) -> String,
        both: impl FnOnce(&mut Self, DiffPath, &T, &T),
    ) {
        match (expected, actual) {
            (None, None) => {}
            (Some(e), Some(a)) => both(self, path, e, a),
            (e, a) => self.record(path, DiffKind::ValueChanged, e.map(&render), a.map(&render)),
        }
    }

    fn plain<T: PartialEq + Display>(&mut self, path: &DiffPath, expected: &[T], actual: &[T]) {
        self.sequence(
            path,
            expected,
            actual,
            |v| v.to_string(),
            |c, path, e, a| {
                if e != a {
                    c.changed(path, e, a);
                }
            },
        );
    }

    fn lines(&mut self, path: &DiffPath, field: &str, expected: &[String], actual: &[String]) {
        self.sequence(
            &path.name(field),
            expected,
            actual,
            |l| format!("{l:?}"),
            |c, path, e, a| {
                if e != a {
                    c.changed(path, format!("{e:?}"), format!("{a:?}"));
                }
            },
        );
    }

    fn values(&mut self, path: DiffPath, expected: &Var, actual: &Var) {
        match (expected, actual) {
            (Var::None, Var::None) => {}
            (Var::None, _) | (_, Var::None) => self.changed(path, expected, actual),
            (Var::List(e), Var::List(a)) => self.sequence(
                &path,
                e,
                a,
                |v| v.to_string(),
                |c, path, e, a| c.values(path, e, a),
            ),
            (Var::Map(e), Var::Map(a)) => self.maps(&path, e, a),
            (Var::Float(e), Var::Float(a)) => {
                if !floats_close(*e, *a) {
                    self.changed(path, expected, actual);
                }
            }
            (e, a) if e.type_tag() != a.type_tag() => self.record(
                path,
                DiffKind::TypeMismatch,
                Some(e.type_name().to_string()),
                Some(a.type_name().to_string()),
            ),
            (e, a) => {
                if e != a {
                    self.changed(path, e, a);
                }
            }
        }
    }

    fn maps(&mut self, path: &DiffPath, expected: &[(Var, Var)], actual: &[(Var, Var)]) {
        type Sides<'v> = (&'v Var, Option<&'v Var>, Option<&'v Var>);
        let mut keys: BTreeMap<(&'static str, String), Sides> = BTreeMap::new();
        for (key, value) in expected {
            let entry = keys
                .entry((key.type_name(), key.to_string()))
                .or_insert((key, None, None));
            entry.1 = Some(value);
        }
        for (key, value) in actual {
            let entry = keys
                .entry((key.type_name(), key.to_string()))
                .or_insert((key, None, None));
            entry.2 = Some(value);
        }

        for ((_, literal), (key, e, a)) in keys {
            if self.full() {
                return;
            }
            let key_path = match key {
                Var::Str(s) => path.name(s),
                _ => path.key(literal),
            };
            match (e, a) {
                (Some(e), Some(a)) => self.values(key_path, e, a),
                (Some(e), None) => {
                    self.record(key_path, DiffKind::Missing, Some(e.to_string()), None)
                }
                (None, Some(a)) => {
                    self.record(key_path, DiffKind::Extra, None, Some(a.to_string()))
                }
                (None, None) => {}
            }
        }
    }

    fn objects(&mut self, expected: &MooDatabase, actual: &MooDatabase) {
        let ids: BTreeSet<i64> = expected
            .objects
            .keys()
            .chain(actual.objects.keys())
            .copied()
            .collect();
        for id in ids {
            if self.full() {
                return;
            }
            let path = DiffPath::object(id);
            match (expected.objects.get(&id), actual.objects.get(&id)) {
                (Some(e), Some(a)) => self.object(&path, e, a),
                (Some(e), None) => {
                    self.record(path, DiffKind::Missing, Some(describe_object(e)), None)
                }
                (None, Some(a)) => {
                    self.record(path, DiffKind::Extra, None, Some(describe_object(a)))
                }
                (None, None) => {}
            }
        }
    }

    fn object(&mut self, path: &DiffPath, expected: &MooObject, actual: &MooObject) {
        self.text(path, "name", &expected.name, &actual.name);
        self.scalar(path, "flags", &expected.flags, &actual.flags);
        self.scalar(path, "owner", &expected.owner, &actual.owner);
        self.values(path.name("location"), &expected.location, &actual.location);
        self.values(
            path.name("last_move"),
            &expected.last_move,
            &actual.last_move,
        );
        self.scalar(
            path,
            "propdefs_count",
            &expected.propdefs_count,
            &actual.propdefs_count,
        );
        self.scalar(path, "anon", &expected.anon, &actual.anon);
        self.plain(&path.name("parents"), &expected.parents, &actual.parents);
        self.plain(&path.name("children"), &expected.children, &actual.children);
        self.plain(&path.name("contents"), &expected.contents, &actual.contents);
        self.properties(path, &expected.properties, &actual.properties);
        self.sequence(
            &path.name("verbs"),
            &expected.verbs,
            &actual.verbs,
            |v| format!("{:?}", v.name),
            |c, path, e, a| c.verb(&path, e, a),
        );
    }

    fn properties(&mut self, path: &DiffPath, expected: &[Property], actual: &[Property]) {
        let path = path.name("properties");
        let expected = property_labels(expected);
        let actual = property_labels(actual);
        let labels: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
        for label in labels {
            if self.full() {
                return;
            }
            let prop_path = path.name(label);
            match (expected.get(label), actual.get(label)) {
                (Some(e), Some(a)) => {
                    self.values(prop_path.name("value"), &e.value, &a.value);
                    self.scalar(&prop_path, "owner", &e.owner, &a.owner);
                    self.scalar(&prop_path, "perms", &e.perms, &a.perms);
                }
                (Some(e), None) => {
                    self.record(prop_path, DiffKind::Missing, Some(describe_property(e)), None)
                }
                (None, Some(a)) => {
                    self.record(prop_path, DiffKind::Extra, None, Some(describe_property(a)))
                }
                (None, None) => {}
            }
        }
    }

    fn verb(&mut self, path: &DiffPath, expected: &Verb, actual: &Verb) {
        self.text(path, "name", &expected.name, &actual.name);
        self.scalar(path, "owner", &expected.owner, &actual.owner);
        self.scalar(path, "perms", &expected.perms, &actual.perms);
        self.scalar(path, "prep", &expected.prep, &actual.prep);
        self.optional(
            path.name("code"),
            expected.code.as_ref(),
            actual.code.as_ref(),
            |code| describe_program(code),
            |c, path, e, a| {
                c.sequence(
                    &path,
                    e,
                    a,
                    |l| format!("{l:?}"),
                    |c, path, e, a| {
                        if e != a {
                            c.changed(path, format!("{e:?}"), format!("{a:?}"));
                        }
                    },
                )
            },
        );
    }

    fn waifs(&mut self, expected: &BTreeMap<usize, Waif>, actual: &BTreeMap<usize, Waif>) {
        let path = DiffPath::root().name("waifs");
        let indices: BTreeSet<usize> = expected.keys().chain(actual.keys()).copied().collect();
        for index in indices {
            if self.full() {
                return;
            }
            let waif_path = path.index(index);
            match (expected.get(&index), actual.get(&index)) {
                (Some(e), Some(a)) => self.waif(&waif_path, e, a),
                (Some(e), None) => {
                    self.record(waif_path, DiffKind::Missing, Some(describe_waif(e)), None)
                }
                (None, Some(a)) => {
                    self.record(waif_path, DiffKind::Extra, None, Some(describe_waif(a)))
                }
                (None, None) => {}
            }
        }
    }

    fn waif(&mut self, path: &DiffPath, expected: &Waif, actual: &Waif) {
        self.scalar(path, "class", &expected.class, &actual.class);
        self.scalar(path, "owner", &expected.owner, &actual.owner);
        self.scalar(
            path,
            "propdefs_length",
            &expected.propdefs_length,
            &actual.propdefs_length,
        );
        self.sequence(
            &path.name("props"),
            &expected.props,
            &actual.props,
            |(slot, value)| format!("{slot}: {value}"),
            |c, path, e, a| {
                c.scalar(&path, "slot", &e.0, &a.0);
                c.values(path.name("value"), &e.1, &a.1);
            },
        );
    }

    fn rt_env(&mut self, path: &DiffPath, expected: &[(String, Var)], actual: &[(String, Var)]) {
        self.sequence(
            &path.name("rt_env"),
            expected,
            actual,
            |(name, value)| format!("{name} = {value}"),
            |c, path, e, a| {
                c.text(&path, "name", &e.0, &a.0);
                c.values(path.name("value"), &e.1, &a.1);
            },
        );
    }

    fn activation_info(&mut self, path: &DiffPath, e: &ActivationInfo, a: &ActivationInfo) {
        self.values(path.name("temp_value"), &e.temp_value, &a.temp_value);
        self.values(path.name("temp_this"), &e.temp_this, &a.temp_this);
        self.values(path.name("temp_vloc"), &e.temp_vloc, &a.temp_vloc);
        self.scalar(path, "threaded", &e.threaded, &a.threaded);
        self.scalar(path, "this", &e.this, &a.this);
        self.scalar(path, "unused1", &e.unused1, &a.unused1);
        self.scalar(path, "unused2", &e.unused2, &a.unused2);
        self.scalar(path, "player", &e.player, &a.player);
        self.scalar(path, "unused3", &e.unused3, &a.unused3);
        self.scalar(path, "programmer", &e.programmer, &a.programmer);
        self.scalar(path, "vloc", &e.vloc, &a.vloc);
        self.scalar(path, "unused4", &e.unused4, &a.unused4);
        self.scalar(path, "debug", &e.debug, &a.debug);
        self.text(path, "verb", &e.verb, &a.verb);
        self.text(path, "verbname", &e.verbname, &a.verbname);
    }

    fn activation(&mut self, path: &DiffPath, e: &Activation, a: &Activation) {
        self.scalar(path, "lang_version", &e.lang_version, &a.lang_version);
        self.lines(path, "code", &e.code, &a.code);
        self.rt_env(path, &e.rt_env, &a.rt_env);
        self.sequence(
            &path.name("stack"),
            &e.stack,
            &a.stack,
            |v| v.to_string(),
            |c, path, e, a| c.values(path, e, a),
        );
        self.activation_info(&path.name("info"), &e.info, &a.info);
        self.values(path.name("temp_end"), &e.temp_end, &a.temp_end);
        self.scalar(path, "pc", &e.pc, &a.pc);
        self.scalar(path, "bi_func_pc", &e.bi_func_pc, &a.bi_func_pc);
        self.scalar(path, "error_pc", &e.error_pc, &a.error_pc);
        self.optional(
            path.name("bi_func_name"),
            e.bi_func_name.as_ref(),
            a.bi_func_name.as_ref(),
            |name| format!("{name:?}"),
            |c, path, e, a| {
                if e != a {
                    c.changed(path, format!("{e:?}"), format!("{a:?}"));
                }
            },
        );
    }

    fn vm(&mut self, path: &DiffPath, e: &Vm, a: &Vm) {
        self.values(path.name("locals"), &e.locals, &a.locals);
        self.scalar(path, "vector", &e.vector, &a.vector);
        self.scalar(path, "func_id", &e.func_id, &a.func_id);
        self.scalar(path, "max_stackframes", &e.max_stackframes, &a.max_stackframes);
        self.sequence(
            &path.name("stack"),
            &e.stack,
            &a.stack,
            |frame| format!("activation of {:?}", frame.info.verb),
            |c, path, e, a| c.activation(&path, e, a),
        );
    }

    fn queued_task(&mut self, path: &DiffPath, e: &QueuedTask, a: &QueuedTask) {
        self.scalar(path, "unused", &e.unused, &a.unused);
        self.scalar(path, "first_lineno", &e.first_lineno, &a.first_lineno);
        self.scalar(path, "start_time", &e.start_time, &a.start_time);
        self.scalar(path, "id", &e.id, &a.id);
        self.activation_info(&path.name("activation"), &e.activation, &a.activation);
        self.rt_env(path, &e.rt_env, &a.rt_env);
        self.lines(path, "code", &e.code, &a.code);
    }

    fn suspended_task(&mut self, path: &DiffPath, e: &SuspendedTask, a: &SuspendedTask) {
        self.scalar(path, "start_time", &e.start_time, &a.start_time);
        self.scalar(path, "id", &e.id, &a.id);
        self.optional(
            path.name("value"),
            e.value.as_ref(),
            a.value.as_ref(),
            |v| v.to_string(),
            |c, path, e, a| c.values(path, e, a),
        );
        self.vm(&path.name("vm"), &e.vm, &a.vm);
    }

    fn interrupted_task(&mut self, path: &DiffPath, e: &InterruptedTask, a: &InterruptedTask) {
        self.scalar(path, "id", &e.id, &a.id);
        self.text(path, "status", &e.status, &a.status);
        self.vm(&path.name("vm"), &e.vm, &a.vm);
    }
}

/// Labels properties by name. Repeated names get a `~n` suffix from their second occurrence on,
/// and unnamed slots are labelled by position.
fn property_labels(properties: &[Property]) -> BTreeMap<String, &Property> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    properties
        .iter()
        .enumerate()
        .map(|(slot, property)| {
            if property.name.is_empty() {
                return (format!("<slot {slot}>"), property);
            }
            let count = seen.entry(property.name.as_str()).or_default();
            *count += 1;
            let label = if *count == 1 {
                property.name.clone()
            } else {
                format!("{}~{count}", property.name)
            };
            (label, property)
        })
        .collect()
}

fn describe_object(o: &MooObject) -> String {
    format!("{} {:?}", o.objid(), o.name)
}

fn describe_property(p: &Property) -> String {
    format!("{} (owner {}, perms {})", p.value, p.owner, p.perms)
}

fn describe_waif(w: &Waif) -> String {
    format!("waif of class {} with {} slot(s)", w.class, w.props.len())
}

fn describe_program(code: &[String]) -> String {
    match code.len() {
        1 => "1 line".to_string(),
        n => format!("{n} lines"),
    }
}
