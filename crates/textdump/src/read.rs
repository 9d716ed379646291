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

use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;

use moodb_var::{Objid, Var, VarType, WaifRef, v_empty_map, v_obj};
use tracing::{debug, info, trace, warn};

use crate::error::{Context, DanglingReference, DecodeError};
use crate::model::{
    Activation, ActivationInfo, DEFAULT_MAX_STACKFRAMES, InterruptedTask, LineEnding, MooDatabase,
    MooObject, Property, QueuedTask, SuspendedTask, Verb, Vm, Waif,
};
use crate::version::DbVersion;
use crate::waif::WaifTable;
use crate::{EncodingMode, ReaderOptions};

/// Linked-list fields of the LambdaMOO (v4 and earlier) object layout. Contents and children are
/// rebuilt from these once every object has been read.
struct LegacyLinks {
    contents: Objid,
    next: Objid,
    child: Objid,
    sibling: Objid,
}

enum ObjectSlot {
    Recycled(i64),
    Present(MooObject, Option<LegacyLinks>),
}

pub(crate) fn decode_bytes(bytes: &[u8], encoding: EncodingMode) -> String {
    match encoding {
        // Every byte is its own code point, so a read/write cycle is byte transparent.
        EncodingMode::ISO8859_1 => bytes.iter().map(|b| *b as char).collect(),
        EncodingMode::UTF8 => encoding_rs::UTF_8
            .decode_without_bom_handling(bytes)
            .0
            .into_owned(),
    }
}

pub struct TextdumpReader<R: BufRead> {
    pub line_num: usize,
    pub version: DbVersion,
    pub version_string: String,
    pub line_ending: LineEnding,
    reader: R,
    encoding_mode: EncodingMode,
    ctx: Context,
    waifs: WaifTable,
    dangling: Vec<DanglingReference>,
    buf: Vec<u8>,
}

impl<R: BufRead> TextdumpReader<R> {
    pub fn new(mut reader: R, options: &ReaderOptions) -> Result<Self, DecodeError> {
        let ctx = Context {
            section: "version",
            object: None,
            field: None,
            line: 1,
        };
        let mut buf = vec![];
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| DecodeError::Io(e, ctx.clone()))?;
        if n == 0 {
            return Err(DecodeError::TruncatedInput(ctx));
        }
        // The banner decides the line ending for the whole file.
        let line_ending = if buf.ends_with(b"\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let version_string = decode_bytes(&buf, options.encoding);
        info!("version {}", version_string);

        let version = DbVersion::parse(&version_string).ok_or_else(|| {
            DecodeError::Version(format!("unrecognized version banner: {version_string:?}"))
        })?;

        Ok(Self {
            line_num: 1,
            version,
            version_string,
            line_ending,
            reader,
            encoding_mode: options.encoding,
            ctx,
            waifs: WaifTable::default(),
            dangling: vec![],
            buf,
        })
    }

    /// Object references found in fields that name no declared object. Populated by
    /// [`TextdumpReader::read_textdump`].
    pub fn dangling_references(&self) -> &[DanglingReference] {
        &self.dangling
    }

    pub fn take_dangling_references(&mut self) -> Vec<DanglingReference> {
        std::mem::take(&mut self.dangling)
    }

    fn ctx(&self) -> Context {
        Context {
            line: self.line_num,
            ..self.ctx.clone()
        }
    }

    fn section(&mut self, section: &'static str) {
        self.ctx.section = section;
        self.ctx.object = None;
        self.ctx.field = None;
    }

    fn field(&mut self, field: &'static str) {
        self.ctx.field = Some(field);
    }

    fn parse_error(&self, message: String) -> DecodeError {
        DecodeError::Parse(message, self.ctx())
    }

    fn read_next_line(&mut self) -> Result<String, DecodeError> {
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| DecodeError::Io(e, self.ctx()))?;
        if n == 0 {
            return Err(DecodeError::TruncatedInput(self.ctx()));
        }
        self.line_num += 1;
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.line_ending == LineEnding::CrLf && self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(decode_bytes(&self.buf, self.encoding_mode))
    }

    fn at_eof(&mut self) -> Result<bool, DecodeError> {
        let ctx = self.ctx();
        self.reader
            .fill_buf()
            .map(|b| b.is_empty())
            .map_err(|e| DecodeError::Io(e, ctx))
    }

    /// Consume whatever follows the last section, returning the non-blank lines.
    fn read_trailing_lines(&mut self) -> Result<Vec<String>, DecodeError> {
        let mut lines = vec![];
        while !self.at_eof()? {
            let line = self.read_next_line()?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn read_num(&mut self) -> Result<i64, DecodeError> {
        let buf = self.read_next_line()?;
        let Ok(i) = buf.trim().parse() else {
            return Err(self.parse_error(format!("invalid number: {buf:?}")));
        };
        Ok(i)
    }

    fn read_count(&mut self) -> Result<usize, DecodeError> {
        let n = self.read_num()?;
        usize::try_from(n).map_err(|_| self.parse_error(format!("negative count: {n}")))
    }

    fn read_objid(&mut self) -> Result<Objid, DecodeError> {
        Ok(Objid(self.read_num()?))
    }

    fn read_float(&mut self) -> Result<f64, DecodeError> {
        let buf = self.read_next_line()?;
        let f = match buf.trim() {
            "nan" | "-nan" => f64::NAN,
            "inf" => f64::INFINITY,
            "-inf" => f64::NEG_INFINITY,
            s => s
                .parse()
                .map_err(|_| self.parse_error(format!("invalid float: {buf:?}")))?,
        };
        Ok(f)
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        let buf = self.read_next_line()?;
        match buf.trim() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(self.parse_error(format!("invalid bool: {buf:?}"))),
        }
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_next_line()
    }

    /// Read a line of the form `<n><suffix>`, e.g. `3 clocks`.
    fn read_counted(&mut self, suffix: &str) -> Result<usize, DecodeError> {
        let line = self.read_string()?;
        let Some(n) = line.trim_end().strip_suffix(suffix) else {
            return Err(self.parse_error(format!("expected '<n>{suffix}', got {line:?}")));
        };
        n.trim()
            .parse()
            .map_err(|_| self.parse_error(format!("invalid count in {line:?}")))
    }

    /// Read a line which is a series of numbers.
    fn read_number_line(
        &mut self,
        what: &str,
        min: usize,
        max: usize,
    ) -> Result<Vec<i64>, DecodeError> {
        let line = self.read_string()?;
        let mut numbers = Vec::with_capacity(max);
        for n in line.split_whitespace() {
            let Ok(n) = n.parse::<i64>() else {
                return Err(self.parse_error(format!("invalid number {n:?} in {what}")));
            };
            numbers.push(n);
        }
        if numbers.len() < min || numbers.len() > max {
            return Err(self.parse_error(format!(
                "expected {min}..={max} numbers in {what}, got {}",
                numbers.len()
            )));
        }
        Ok(numbers)
    }

    pub fn read_var(&mut self) -> Result<Var, DecodeError> {
        let tag = self.read_num()?;
        self.read_var_value(tag)
    }

    /// Read the payload of a value whose tag has already been consumed.
    pub fn read_var_value(&mut self, tag: i64) -> Result<Var, DecodeError> {
        let Some(vtype) = VarType::from_tag(tag).filter(|t| self.version.allows(*t)) else {
            return Err(DecodeError::MalformedTag {
                tag,
                ctx: self.ctx(),
            });
        };
        let v = match vtype {
            VarType::TYPE_INT => Var::Int(self.read_num()?),
            VarType::TYPE_OBJ => Var::Obj(self.read_objid()?),
            VarType::TYPE_STR => Var::Str(self.read_string()?),
            VarType::TYPE_ERR => Var::Err(self.read_num()?),
            VarType::TYPE_LIST => {
                let n = self.read_count()?;
                let mut l = Vec::new();
                for _ in 0..n {
                    l.push(self.read_var()?);
                }
                Var::List(l)
            }
            VarType::TYPE_CLEAR => Var::Clear,
            VarType::TYPE_NONE => Var::None,
            VarType::TYPE_CATCH => Var::Catch(self.read_num()?),
            VarType::TYPE_FINALLY => Var::Finally(self.read_num()?),
            VarType::TYPE_FLOAT => Var::Float(self.read_float()?),
            VarType::TYPE_MAP => {
                let n = self.read_count()?;
                let mut m = Vec::new();
                for _ in 0..n {
                    let key = self.read_var()?;
                    if matches!(key, Var::List(_) | Var::Map(_) | Var::Clear | Var::None) {
                        return Err(DecodeError::InvalidMapKey {
                            kind: key.type_name(),
                            ctx: self.ctx(),
                        });
                    }
                    let value = self.read_var()?;
                    m.push((key, value));
                }
                Var::Map(m)
            }
            VarType::TYPE_ANON => Var::Anon(self.read_num()?),
            VarType::TYPE_WAIF => self.read_waif()?,
            VarType::TYPE_BOOL => Var::Bool(self.read_bool()?),
        };
        trace!(?v, "value");
        Ok(v)
    }

    fn read_waif_terminator(&mut self) -> Result<(), DecodeError> {
        let line = self.read_string()?;
        if line != "." {
            return Err(self.parse_error(format!("expected waif terminator '.', got {line:?}")));
        }
        Ok(())
    }

    fn read_waif(&mut self) -> Result<Var, DecodeError> {
        let header = self.read_string()?;
        let Some((kind, index)) = header.trim().split_once(' ') else {
            return Err(self.parse_error(format!("invalid waif header: {header:?}")));
        };
        let Ok(index) = index.trim().parse::<usize>() else {
            return Err(self.parse_error(format!("invalid waif index: {header:?}")));
        };
        match kind {
            "r" => {
                self.read_waif_terminator()?;
                if !self.waifs.is_defined(index) {
                    return Err(DecodeError::DanglingWaifReference {
                        index,
                        ctx: self.ctx(),
                    });
                }
            }
            // ToastStunt writes `c`; some tools write `d`.
            "c" | "d" => {
                self.waifs.begin(index);
                let class = self.read_objid()?;
                let owner = self.read_objid()?;
                let propdefs_length = self.read_num()?;
                let mut props = vec![];
                loop {
                    let slot = self.read_num()?;
                    if slot == -1 {
                        break;
                    }
                    props.push((slot, self.read_var()?));
                }
                self.read_waif_terminator()?;
                self.waifs.finish(
                    index,
                    Waif {
                        class,
                        owner,
                        propdefs_length,
                        props,
                    },
                );
            }
            _ => return Err(self.parse_error(format!("invalid waif header: {header:?}"))),
        }
        Ok(Var::Waif(WaifRef(index)))
    }

    fn objids_of(&self, v: Var) -> Result<Vec<Objid>, DecodeError> {
        let Var::List(items) = v else {
            return Err(self.parse_error(format!("expected a list of objects, got {v}")));
        };
        items
            .into_iter()
            .map(|item| match item {
                Var::Obj(o) => Ok(o),
                other => Err(self.parse_error(format!("expected an object, got {other}"))),
            })
            .collect()
    }

    fn read_objid_list(&mut self) -> Result<Vec<Objid>, DecodeError> {
        let v = self.read_var()?;
        self.objids_of(v)
    }

    fn read_verbdef(&mut self, object: Objid) -> Result<Verb, DecodeError> {
        let name = self.read_string()?;
        let owner = self.read_objid()?;
        let perms = self.read_num()?;
        let prep = self.read_num()?;
        Ok(Verb {
            name,
            owner,
            perms,
            prep,
            object,
            code: None,
        })
    }

    fn read_object(&mut self) -> Result<ObjectSlot, DecodeError> {
        self.ctx.object = None;
        self.field("header");
        let ospec = self.read_string()?;
        let Some(rest) = ospec.trim().strip_prefix('#') else {
            return Err(self.parse_error(format!("invalid object spec: {ospec:?}")));
        };
        let mut parts = rest.split_whitespace();
        let Some(oid) = parts.next().and_then(|s| s.parse::<i64>().ok()) else {
            return Err(self.parse_error(format!("invalid objid: {ospec:?}")));
        };
        match parts.next() {
            None => {}
            Some("recycled") => {
                trace!(oid, "recycled");
                return Ok(ObjectSlot::Recycled(oid));
            }
            Some(_) => return Err(self.parse_error(format!("invalid object spec: {ospec:?}"))),
        }
        self.ctx.object = Some(oid);
        let objid = Objid(oid);

        self.field("name");
        let name = self.read_string()?;
        if !self.version.is_next_gen() {
            self.field("handles");
            let _handles = self.read_string()?;
        }
        self.field("flags");
        let flags = self.read_num()?;
        self.field("owner");
        let owner = self.read_objid()?;

        let mut obj = MooObject::new(oid, &name);
        obj.flags = flags;
        obj.owner = owner;

        let links = if self.version.is_next_gen() {
            self.field("location");
            obj.location = self.read_var()?;
            if self.version.has_last_move() {
                self.field("last_move");
                obj.last_move = self.read_var()?;
            }
            self.field("contents");
            obj.contents = self.read_objid_list()?;
            self.field("parents");
            obj.parents = match self.read_var()? {
                Var::Obj(parent) => vec![parent],
                parents @ Var::List(_) => self.objids_of(parents)?,
                other => return Err(self.parse_error(format!("invalid parents: {other}"))),
            };
            self.field("children");
            obj.children = self.read_objid_list()?;
            None
        } else {
            self.field("location");
            obj.location = Var::Obj(self.read_objid()?);
            self.field("contents");
            let contents = self.read_objid()?;
            self.field("next");
            let next = self.read_objid()?;
            self.field("parent");
            obj.parents = vec![self.read_objid()?];
            self.field("child");
            let child = self.read_objid()?;
            self.field("sibling");
            let sibling = self.read_objid()?;
            Some(LegacyLinks {
                contents,
                next,
                child,
                sibling,
            })
        };

        self.field("verbdefs");
        let num_verbs = self.read_count()?;
        for _ in 0..num_verbs {
            let verb = self.read_verbdef(objid)?;
            obj.verbs.push(verb);
        }

        self.field("propdefs");
        let num_pdefs = self.read_count()?;
        let mut propdefs = Vec::with_capacity(num_pdefs);
        for _ in 0..num_pdefs {
            propdefs.push(self.read_string()?);
        }

        self.field("propvals");
        let num_pvals = self.read_count()?;
        if num_pdefs > num_pvals {
            return Err(DecodeError::CountMismatch {
                what: "property values",
                expected: num_pdefs,
                actual: num_pvals,
                ctx: self.ctx(),
            });
        }
        let mut names = propdefs.into_iter();
        for _ in 0..num_pvals {
            let value = self.read_var()?;
            let owner = self.read_objid()?;
            let perms = self.read_num()?;
            obj.properties.push(Property {
                name: names.next().unwrap_or_default(),
                value,
                owner,
                perms,
            });
        }
        obj.propdefs_count = num_pdefs;

        debug!(
            oid,
            name = %obj.name,
            verbs = obj.verbs.len(),
            props = obj.properties.len(),
            "object"
        );
        Ok(ObjectSlot::Present(obj, links))
    }

    /// The dense object table: exactly `count` slots numbered from zero.
    fn read_dense_objects(
        &mut self,
        db: &mut MooDatabase,
        links: &mut BTreeMap<i64, LegacyLinks>,
        count: usize,
    ) -> Result<(), DecodeError> {
        for expected in 0..count {
            let (oid, slot) = match self.read_object()? {
                ObjectSlot::Recycled(oid) => (oid, None),
                ObjectSlot::Present(obj, l) => (obj.id, Some((obj, l))),
            };
            if oid != expected as i64 {
                return Err(self.parse_error(format!("expected object #{expected}, found #{oid}")));
            }
            match slot {
                None => {
                    db.recycled_objects.insert(oid);
                }
                Some((obj, l)) => {
                    if let Some(l) = l {
                        links.insert(oid, l);
                    }
                    db.objects.insert(oid, obj);
                }
            }
        }
        Ok(())
    }

    /// Anonymous objects come in count-prefixed batches, the last of which is empty.
    fn read_anonymous_objects(&mut self, db: &mut MooDatabase) -> Result<(), DecodeError> {
        self.section("anonymous objects");
        let mut total = 0;
        loop {
            self.ctx.object = None;
            self.field("batch");
            let n = self.read_count()?;
            if n == 0 {
                break;
            }
            for _ in 0..n {
                match self.read_object()? {
                    ObjectSlot::Recycled(oid) => {
                        warn!("ignoring recycled slot #{oid} among anonymous objects");
                    }
                    ObjectSlot::Present(mut obj, _) => {
                        if db.objects.contains_key(&obj.id) || db.recycled_objects.contains(&obj.id)
                        {
                            return Err(DecodeError::DuplicateObject {
                                id: obj.id,
                                ctx: self.ctx(),
                            });
                        }
                        obj.anon = true;
                        db.objects.insert(obj.id, obj);
                        total += 1;
                    }
                }
            }
        }
        info!("# anonymous objects: {}", total);
        Ok(())
    }

    fn read_program(&mut self) -> Result<Vec<String>, DecodeError> {
        let mut program = vec![];
        loop {
            let line = self.read_string()?;
            if line == "." {
                break;
            }
            program.push(line);
        }
        Ok(program)
    }

    fn read_programs(&mut self, db: &mut MooDatabase, count: usize) -> Result<(), DecodeError> {
        self.section("verbs");
        for _ in 0..count {
            self.ctx.object = None;
            self.field("locator");
            let header = self.read_string()?;
            let Some((oid, index)) = parse_verb_locator(&header) else {
                return Err(self.parse_error(format!("invalid verb locator: {header:?}")));
            };
            self.ctx.object = Some(oid);
            self.field("code");
            let code = self.read_program()?;

            let Some(obj) = db.objects.get_mut(&oid) else {
                return Err(DecodeError::DanglingReference {
                    target: Objid(oid),
                    ctx: self.ctx(),
                });
            };
            let num_verbs = obj.verbs.len();
            let Some(verb) = obj.verbs.get_mut(index) else {
                return Err(DecodeError::CountMismatch {
                    what: "verbs",
                    expected: index + 1,
                    actual: num_verbs,
                    ctx: self.ctx(),
                });
            };
            verb.code = Some(code);
        }
        Ok(())
    }

    fn read_rt_env(&mut self) -> Result<Vec<(String, Var)>, DecodeError> {
        let num_variables = self.read_counted(" variables")?;
        let mut rt_env = Vec::with_capacity(num_variables);
        for _ in 0..num_variables {
            let name = self.read_string()?;
            let value = self.read_var()?;
            rt_env.push((name, value));
        }
        Ok(rt_env)
    }

    fn read_activation_info(&mut self) -> Result<ActivationInfo, DecodeError> {
        let temp_value = self.read_var()?;
        let temp_this = if self.version.has_activation_this() {
            Some(self.read_var()?)
        } else {
            None
        };
        let temp_vloc = if self.version.has_anon() {
            Some(self.read_var()?)
        } else {
            None
        };
        let threaded = if self.version.has_threaded() {
            self.read_num()?
        } else {
            0
        };
        let h = self.read_number_line("activation header", 9, 9)?;
        // Placeholders for the argument strings, never meaningful in a dump.
        for _ in 0..4 {
            self.read_string()?;
        }
        let verb = self.read_string()?;
        let verbname = self.read_string()?;
        Ok(ActivationInfo {
            temp_value,
            temp_this: temp_this.unwrap_or_else(|| v_obj(h[0])),
            temp_vloc: temp_vloc.unwrap_or_else(|| v_obj(h[6])),
            threaded,
            this: h[0],
            unused1: h[1],
            unused2: h[2],
            player: h[3],
            unused3: h[4],
            programmer: h[5],
            vloc: h[6],
            unused4: h[7],
            debug: h[8],
            verb,
            verbname,
        })
    }

    fn read_activation(&mut self) -> Result<Activation, DecodeError> {
        let lang_version = if self.version.has_language_version() {
            let line = self.read_string()?;
            let Some(n) = line
                .trim()
                .strip_prefix("language version ")
                .and_then(|n| n.trim().parse().ok())
            else {
                return Err(self.parse_error(format!("invalid language version: {line:?}")));
            };
            n
        } else {
            self.version.number() as i64
        };
        let code = self.read_program()?;
        let rt_env = self.read_rt_env()?;

        let stack_in_use = self.read_counted(" rt_stack slots in use")?;
        let mut stack = Vec::with_capacity(stack_in_use);
        for _ in 0..stack_in_use {
            stack.push(self.read_var()?);
        }
        let info = self.read_activation_info()?;
        let temp_end = self.read_var()?;

        let pcs = self.read_number_line("activation pc line", 2, 3)?;
        let bi_func_pc = pcs[1];
        let bi_func_name = if bi_func_pc != 0 {
            let name = self.read_string()?;
            debug!("frame suspended in builtin {name}; builtin data is not decoded");
            Some(name)
        } else {
            None
        };

        Ok(Activation {
            lang_version,
            code,
            rt_env,
            stack,
            info,
            temp_end,
            pc: pcs[0],
            bi_func_pc,
            error_pc: pcs.get(2).copied().unwrap_or(0),
            bi_func_name,
        })
    }

    fn read_vm(&mut self) -> Result<Vm, DecodeError> {
        let locals = if self.version.has_task_local() {
            self.read_var()?
        } else {
            v_empty_map()
        };
        let header = self.read_number_line("vm header", 3, 4)?;
        let Ok(top) = usize::try_from(header[0]) else {
            return Err(self.parse_error(format!("invalid activation stack top: {}", header[0])));
        };
        let mut stack = Vec::new();
        for _ in 0..=top {
            stack.push(self.read_activation()?);
        }
        Ok(Vm {
            locals,
            vector: header[1],
            func_id: header[2],
            max_stackframes: header.get(3).copied().unwrap_or(DEFAULT_MAX_STACKFRAMES),
            stack,
        })
    }

    fn read_queued_task(&mut self) -> Result<QueuedTask, DecodeError> {
        let header = self.read_number_line("queued task header", 4, 4)?;
        let activation = self.read_activation_info()?;
        let rt_env = self.read_rt_env()?;
        let code = self.read_program()?;
        Ok(QueuedTask {
            unused: header[0],
            first_lineno: header[1],
            start_time: header[2],
            id: header[3],
            activation,
            rt_env,
            code,
        })
    }

    fn read_suspended_task(&mut self) -> Result<SuspendedTask, DecodeError> {
        let header = self.read_number_line("suspended task header", 2, 3)?;
        let value = match header.get(2) {
            Some(tag) => Some(self.read_var_value(*tag)?),
            None => None,
        };
        let vm = self.read_vm()?;
        Ok(SuspendedTask {
            start_time: header[0],
            id: header[1],
            value,
            vm,
        })
    }

    fn read_interrupted_task(&mut self) -> Result<InterruptedTask, DecodeError> {
        let line = self.read_string()?;
        let (id, status) = match line.split_once(' ') {
            Some((id, status)) => (id, status.to_string()),
            None => (line.as_str(), String::new()),
        };
        let Ok(id) = id.trim().parse() else {
            return Err(self.parse_error(format!("invalid interrupted task header: {line:?}")));
        };
        let vm = self.read_vm()?;
        Ok(InterruptedTask { id, status, vm })
    }

    fn read_task_queue(&mut self, db: &mut MooDatabase) -> Result<(), DecodeError> {
        self.section("clocks");
        let clocks = self.read_counted(" clocks")?;
        for _ in 0..clocks {
            let clock = self.read_string()?;
            db.clocks.push(clock);
        }

        self.section("queued tasks");
        let num_queued = self.read_counted(" queued tasks")?;
        for _ in 0..num_queued {
            let task = self.read_queued_task()?;
            db.queued_tasks.push(task);
        }

        self.section("suspended tasks");
        let num_suspended = self.read_counted(" suspended tasks")?;
        for _ in 0..num_suspended {
            let task = self.read_suspended_task()?;
            db.suspended_tasks.push(task);
        }

        if self.version.has_interrupted_tasks() {
            self.section("interrupted tasks");
            let num_interrupted = self.read_counted(" interrupted tasks")?;
            for _ in 0..num_interrupted {
                let task = self.read_interrupted_task()?;
                db.interrupted_tasks.push(task);
            }
        }

        info!(
            "# tasks: {} queued, {} suspended, {} interrupted",
            db.queued_tasks.len(),
            db.suspended_tasks.len(),
            db.interrupted_tasks.len()
        );
        Ok(())
    }

    fn read_active_connections(&mut self, db: &mut MooDatabase) -> Result<(), DecodeError> {
        self.section("connections");
        let line = self.read_string()?;
        let trimmed = line.trim_end();
        let (count, with_listeners) =
            if let Some(n) = trimmed.strip_suffix(" active connections with listeners") {
                (n, true)
            } else if let Some(n) = trimmed.strip_suffix(" active connections") {
                (n, false)
            } else {
                return Err(self.parse_error(format!("invalid active connections line: {line:?}")));
            };
        let Ok(count) = count.trim().parse::<usize>() else {
            return Err(self.parse_error(format!("invalid active connections count: {line:?}")));
        };
        db.connections_with_listeners = with_listeners;
        for _ in 0..count {
            let connection = self.read_string()?;
            db.connections.push(connection);
        }
        Ok(())
    }

    fn read_players(&mut self, db: &mut MooDatabase, count: usize) -> Result<(), DecodeError> {
        self.section("players");
        info!("# users: {}", count);
        db.total_players = count;
        for _ in 0..count {
            let player = self.read_objid()?;
            db.players.push(player);
        }
        Ok(())
    }

    fn read_legacy(&mut self, db: &mut MooDatabase) -> Result<(), DecodeError> {
        self.section("header");
        self.field("nobjs");
        let nobjs = self.read_count()?;
        self.field("nprogs");
        let nprogs = self.read_count()?;
        self.field("dummy");
        let _dummy = self.read_num()?;
        self.field("nusers");
        let nusers = self.read_count()?;
        self.read_players(db, nusers)?;

        info!("# objs: {}", nobjs);
        self.section("objects");
        db.total_objects = nobjs;
        let mut links = BTreeMap::new();
        self.read_dense_objects(db, &mut links, nobjs)?;
        rebuild_linked_lists(db, &links);

        info!("# progs: {}", nprogs);
        db.total_verbs = nprogs;
        self.read_programs(db, nprogs)?;

        self.read_task_queue(db)?;

        // Old dumps may stop right after the task queue.
        if !self.at_eof()? {
            self.read_active_connections(db)?;
        }

        self.section("end");
        let trailing = self.read_trailing_lines()?;
        if let Some(first) = trailing.first() {
            return Err(self.parse_error(format!(
                "{} unexpected lines after the last section, starting with {first:?}",
                trailing.len()
            )));
        }
        Ok(())
    }

    fn read_next_gen(&mut self, db: &mut MooDatabase) -> Result<(), DecodeError> {
        self.section("players");
        let nusers = self.read_count()?;
        self.read_players(db, nusers)?;

        self.section("pending finalization");
        let num_pending = self.read_counted(" values pending finalization")?;
        for _ in 0..num_pending {
            match self.read_var()? {
                Var::Anon(id) => db.pending_anon_ids.push(id),
                other => {
                    return Err(self.parse_error(format!(
                        "expected an anonymous object pending finalization, got {other}"
                    )));
                }
            }
        }

        self.read_task_queue(db)?;
        self.read_active_connections(db)?;

        self.section("objects");
        let nobjs = self.read_count()?;
        info!("# objs: {}", nobjs);
        db.total_objects = nobjs;
        let mut links = BTreeMap::new();
        self.read_dense_objects(db, &mut links, nobjs)?;
        if self.version.has_anon() {
            self.read_anonymous_objects(db)?;
        }

        self.section("verbs");
        let nprogs = self.read_count()?;
        info!("# progs: {}", nprogs);
        db.total_verbs = nprogs;
        self.read_programs(db, nprogs)?;

        // Anything left over is verb programs beyond the declared count.
        let trailing = self.read_trailing_lines()?;
        if !trailing.is_empty() {
            let extra = trailing
                .iter()
                .filter(|line| parse_verb_locator(line).is_some())
                .count();
            return Err(DecodeError::CountMismatch {
                what: "verb programs",
                expected: nprogs,
                actual: nprogs + extra.max(1),
                ctx: self.ctx(),
            });
        }
        Ok(())
    }

    pub fn read_textdump(&mut self) -> Result<MooDatabase, DecodeError> {
        let mut db = MooDatabase {
            version: self.version,
            version_string: self.version_string.clone(),
            line_ending: self.line_ending,
            ..MooDatabase::new()
        };

        if self.version.is_next_gen() {
            self.read_next_gen(&mut db)?;
        } else {
            self.read_legacy(&mut db)?;
        }

        db.waifs = std::mem::take(&mut self.waifs).into_waifs();
        if !db.waifs.is_empty() {
            info!("# waifs: {}", db.waifs.len());
        }

        let unresolved = db.resolve_property_names();
        if unresolved > 0 {
            warn!("{unresolved} objects have unresolvable inherited property names");
        }

        let dangling = db.dangling_references();
        for d in &dangling {
            debug!("dangling reference {d}");
        }
        if !dangling.is_empty() {
            warn!("{} references to undeclared objects", dangling.len());
        }
        self.dangling = dangling;

        if !db.object_count_consistent() {
            warn!(
                "object table declares {} slots but holds a different number of live and recycled objects",
                db.total_objects
            );
        }
        Ok(db)
    }
}

/// Parse a program header of the form `#<object>:<verb index>`.
fn parse_verb_locator(line: &str) -> Option<(i64, usize)> {
    let (o, i) = line.trim().strip_prefix('#')?.split_once(':')?;
    Some((o.parse().ok()?, i.parse().ok()?))
}

/// Follow one of the legacy singly linked lists (contents via `next`, children via `sibling`).
fn follow_chain(
    links: &BTreeMap<i64, LegacyLinks>,
    head: Objid,
    next: impl Fn(&LegacyLinks) -> Objid,
) -> Vec<Objid> {
    let mut out = vec![];
    let mut seen = HashSet::new();
    let mut cur = head;
    while !cur.is_sentinel() && seen.insert(cur) {
        out.push(cur);
        let Some(l) = links.get(&cur.0) else {
            break;
        };
        cur = next(l);
    }
    out
}

fn rebuild_linked_lists(db: &mut MooDatabase, links: &BTreeMap<i64, LegacyLinks>) {
    for (oid, l) in links {
        let contents = follow_chain(links, l.contents, |l| l.next);
        let children = follow_chain(links, l.child, |l| l.sibling);
        if let Some(obj) = db.objects.get_mut(oid) {
            obj.contents = contents;
            obj.children = children;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectSlot, TextdumpReader};
    use crate::ReaderOptions;
    use crate::error::DecodeError;
    use crate::model::MooDatabase;
    use crate::version::DbVersion;
    use moodb_var::{
        Objid, Var, v_bool, v_empty_list, v_empty_map, v_float, v_int, v_list, v_map, v_obj,
        v_str, v_waif,
    };
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use test_case::test_case;

    fn reader_for(version: u16, body: &str) -> TextdumpReader<Cursor<Vec<u8>>> {
        let text = format!("** LambdaMOO Database, Format Version {version} **\n{body}");
        TextdumpReader::new(Cursor::new(text.into_bytes()), &ReaderOptions::default()).unwrap()
    }

    #[test_case("0\n42\n", v_int(42); "int")]
    #[test_case("1\n-1\n", v_obj(-1); "obj")]
    #[test_case("2\nhello world\n", v_str("hello world"); "string")]
    #[test_case("2\n\n", v_str(""); "empty string")]
    #[test_case("3\n3\n", Var::Err(3); "error")]
    #[test_case("5\n", Var::Clear; "clear")]
    #[test_case("6\n", Var::None; "none")]
    #[test_case("9\n0.1000000000000000056\n", v_float(0.1); "float")]
    #[test_case("14\n1\n", v_bool(true); "bool")]
    #[test_case("4\n2\n0\n1\n2\nx\n", v_list(&[v_int(1), v_str("x")]); "list")]
    #[test_case("10\n1\n2\nk\n0\n5\n", v_map(&[(v_str("k"), v_int(5))]); "map")]
    #[test_case("12\n77\n", Var::Anon(77); "anon")]
    fn reads_values(body: &str, expected: Var) {
        let mut reader = reader_for(17, body);
        assert_eq!(reader.read_var().unwrap(), expected);
    }

    #[test_case(17, "11\n0\n"; "map iterator tag")]
    #[test_case(17, "15\n0\n"; "past the table")]
    #[test_case(17, "-1\n"; "negative")]
    #[test_case(13, "14\n1\n"; "bool before v17")]
    #[test_case(6, "10\n0\n"; "map before v7")]
    #[test_case(2, "9\n1.5\n"; "float before v3")]
    #[test_case(12, "12\n5\n"; "anon before v13")]
    #[test_case(13, "13\nc 0\n"; "waif before v14")]
    #[test_case(16, "14\n0\n"; "bool in v16")]
    fn rejects_bad_tags(version: u16, body: &str) {
        let mut reader = reader_for(version, body);
        assert!(matches!(
            reader.read_var(),
            Err(DecodeError::MalformedTag { .. })
        ));
    }

    #[test_case("10\n1\n4\n0\n0\n1\n", "list"; "list key")]
    #[test_case("10\n1\n10\n0\n0\n1\n", "map"; "map key")]
    #[test_case("10\n1\n5\n0\n1\n", "clear"; "clear key")]
    #[test_case("10\n1\n6\n0\n1\n", "none"; "none key")]
    fn rejects_unwritable_map_keys(body: &str, kind: &str) {
        let mut reader = reader_for(17, body);
        let err = reader.read_var().unwrap_err();
        let DecodeError::InvalidMapKey { kind: found, .. } = err else {
            panic!("expected an invalid map key, got {err:?}");
        };
        assert_eq!(found, kind);
    }

    /// The nine-number frame header and the strings after it; `this` is #3 and `vloc` is #6.
    const FRAME_HEADER: &str = "3 0 0 4 0 5 6 0 1\nNo\nMore\nParse\nInfos\nverb\nname\n";

    /// The typed values that precede the frame header, as written at `version`.
    fn frame_prefix(version: u16) -> String {
        let mut prefix = "0\n5\n".to_string();
        if version >= 11 {
            prefix.push_str("1\n3\n");
        }
        if version >= 13 {
            prefix.push_str("1\n6\n");
        }
        if version >= 16 {
            prefix.push_str("0\n");
        }
        prefix
    }

    /// A complete single-frame activation as written at `version`.
    fn frame(version: u16) -> String {
        format!(
            "language version {version}\nreturn;\n.\n0 variables\n0 rt_stack slots in use\n{}{FRAME_HEADER}0\n0\n1 0 0\n",
            frame_prefix(version)
        )
    }

    #[test_case(10, "0\n5\n", v_obj(3), v_obj(6), 0; "v10 takes this and vloc from the header")]
    #[test_case(11, "0\n5\n1\n8\n", v_obj(8), v_obj(6), 0; "v11 adds this")]
    #[test_case(13, "0\n5\n1\n8\n12\n9\n", v_obj(8), Var::Anon(9), 0; "v13 adds vloc")]
    #[test_case(16, "0\n5\n1\n8\n1\n9\n1\n", v_obj(8), v_obj(9), 1; "v16 adds threaded")]
    fn activation_info_fields(version: u16, prefix: &str, this: Var, vloc: Var, threaded: i64) {
        let mut reader = reader_for(version, &format!("{prefix}{FRAME_HEADER}"));
        let info = reader.read_activation_info().unwrap();
        assert_eq!(info.temp_value, v_int(5));
        assert_eq!(info.temp_this, this);
        assert_eq!(info.temp_vloc, vloc);
        assert_eq!(info.threaded, threaded);
        assert_eq!(info.this, 3);
        assert_eq!(info.vloc, 6);
        assert_eq!(info.verbname, "name");
        assert!(reader.at_eof().unwrap());
    }

    #[test_case(5, "", v_empty_map(); "no task locals before v6")]
    #[test_case(6, "4\n0\n", v_empty_list(); "v6 task locals")]
    #[test_case(7, "10\n1\n2\nk\n0\n1\n", v_map(&[(v_str("k"), v_int(1))]); "v7 map locals")]
    fn vm_task_locals(version: u16, locals: &str, expected: Var) {
        let body = format!("{locals}0 2 0 50\n{}", frame(version));
        let mut reader = reader_for(version, &body);
        let vm = reader.read_vm().unwrap();
        assert_eq!(vm.locals, expected);
        assert_eq!(vm.max_stackframes, 50);
        assert_eq!(vm.stack.len(), 1);
        assert_eq!(vm.stack[0].lang_version, i64::from(version));
        assert_eq!(vm.stack[0].code, vec!["return;".to_string()]);
        assert!(reader.at_eof().unwrap());
    }

    #[test_case(9, ""; "no interrupted tasks before v10")]
    #[test_case(10, "1 interrupted tasks\n7 interrupted\n4\n0\n0 2 0 50\n"; "v10 interrupted tasks")]
    fn interrupted_task_section(version: u16, section: &str) {
        let mut body = format!("0 clocks\n0 queued tasks\n0 suspended tasks\n{section}");
        if !section.is_empty() {
            body.push_str(&frame(version));
        }
        let mut reader = reader_for(version, &body);
        let mut db = MooDatabase::new();
        reader.read_task_queue(&mut db).unwrap();
        assert!(reader.at_eof().unwrap());
        let ids: Vec<i64> = db.interrupted_tasks.iter().map(|t| t.id).collect();
        let expected: Vec<i64> = if section.is_empty() { vec![] } else { vec![7] };
        assert_eq!(ids, expected);
    }

    fn next_gen_object(id: i64, last_move: &str) -> String {
        format!("#{id}\nthing\n0\n3\n1\n2\n{last_move}4\n0\n1\n-1\n4\n0\n0\n0\n0\n")
    }

    #[test_case(14, "", v_obj(-1); "no last_move before v15")]
    #[test_case(15, "1\n7\n", v_obj(7); "v15 last_move")]
    fn object_last_move(version: u16, last_move: &str, expected: Var) {
        let mut reader = reader_for(version, &next_gen_object(1, last_move));
        let Ok(ObjectSlot::Present(obj, links)) = reader.read_object() else {
            panic!("expected a present object");
        };
        assert!(links.is_none());
        assert_eq!(obj.location, v_obj(2));
        assert_eq!(obj.last_move, expected);
        assert_eq!(obj.parents, vec![Objid(-1)]);
        assert!(reader.at_eof().unwrap());
    }

    const EMPTY_HEADER: &str = "0\n0 values pending finalization\n0 clocks\n0 queued tasks\n0 suspended tasks\n0 interrupted tasks\n0 active connections\n0\n";

    #[test]
    fn anonymous_batches_start_at_v13() {
        let mut v12 = reader_for(12, &format!("{EMPTY_HEADER}0\n"));
        assert!(v12.read_textdump().unwrap().objects.is_empty());

        let batch = format!("{EMPTY_HEADER}1\n{}0\n0\n", next_gen_object(8, ""));
        let db = reader_for(13, &batch).read_textdump().unwrap();
        assert!(db.objects[&8].anon);
        assert_eq!(db.total_objects, 0);

        // Read as v12, the batch terminator is taken for the program count.
        let mut misread = reader_for(12, &format!("{EMPTY_HEADER}0\n0\n"));
        assert!(matches!(
            misread.read_textdump(),
            Err(DecodeError::CountMismatch {
                what: "verb programs",
                ..
            })
        ));
    }

    #[test]
    fn truncated_value_reports_position() {
        let mut reader = reader_for(17, "4\n3\n0\n1\n");
        let err = reader.read_var().unwrap_err();
        let DecodeError::TruncatedInput(ctx) = err else {
            panic!("expected truncated input, got {err:?}");
        };
        assert_eq!(ctx.line, 5);
    }

    #[test]
    fn waif_reference_before_definition_fails() {
        let mut reader = reader_for(17, "13\nr 4\n.\n");
        assert!(matches!(
            reader.read_var(),
            Err(DecodeError::DanglingWaifReference { index: 4, .. })
        ));
    }

    #[test]
    fn waif_definition_then_reference() {
        let body = "4\n2\n13\nd 0\n1641\n2\n3\n0\n0\n5\n-1\n.\n13\nr 0\n.\n";
        let mut reader = reader_for(17, body);
        let v = reader.read_var().unwrap();
        assert_eq!(v, v_list(&[v_waif(0), v_waif(0)]));
        let waifs = std::mem::take(&mut reader.waifs).into_waifs();
        assert_eq!(waifs.len(), 1);
        assert_eq!(waifs[&0].class, Objid(1641));
        assert_eq!(waifs[&0].props, vec![(0, v_int(5))]);
    }

    #[test]
    fn crlf_is_detected_from_banner() {
        let text = b"** LambdaMOO Database, Format Version 17 **\r\n2\r\nabc\r\n";
        let mut reader = TextdumpReader::new(&text[..], &ReaderOptions::default()).unwrap();
        assert_eq!(reader.version, DbVersion::DbvBool);
        assert_eq!(reader.line_ending, crate::LineEnding::CrLf);
        assert_eq!(reader.read_var().unwrap(), v_str("abc"));
    }

    #[test]
    fn latin1_bytes_map_to_code_points() {
        let text = b"** LambdaMOO Database, Format Version 17 **\n2\ncaf\xe9\n";
        let mut reader = TextdumpReader::new(&text[..], &ReaderOptions::default()).unwrap();
        assert_eq!(reader.read_var().unwrap(), v_str("caf\u{e9}"));
    }

    #[test]
    fn bad_banner_is_a_version_error() {
        let text = b"Not a textdump\n";
        assert!(matches!(
            TextdumpReader::new(&text[..], &ReaderOptions::default()),
            Err(DecodeError::Version(_))
        ));
    }

    #[test]
    fn empty_input_is_truncated() {
        assert!(matches!(
            TextdumpReader::new(&b""[..], &ReaderOptions::default()),
            Err(DecodeError::TruncatedInput(_))
        ));
    }
}
