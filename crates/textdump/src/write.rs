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

use std::borrow::Cow;
use std::io;

use moodb_var::{Objid, Var, VarType, WaifRef, format_float};
use tracing::{debug, info};

use crate::error::EncodeError;
use crate::model::{
    Activation, ActivationInfo, InterruptedTask, MooDatabase, MooObject, QueuedTask,
    SuspendedTask, Vm,
};
use crate::version::CURRENT_VERSION;
use crate::waif::{Interned, WaifInterner};
use crate::{EncodingMode, WriterOptions};

/// Encode a line for output. In ISO-8859-1 mode code points up to U+00FF are written as the
/// byte of the same value, which undoes what the reader did; anything above goes through
/// windows-1252.
pub(crate) fn encode_str(s: &str, encoding: EncodingMode) -> Cow<'_, [u8]> {
    match encoding {
        EncodingMode::UTF8 => Cow::Borrowed(s.as_bytes()),
        EncodingMode::ISO8859_1 => {
            if s.is_ascii() {
                return Cow::Borrowed(s.as_bytes());
            }
            let mut out = Vec::with_capacity(s.len());
            for c in s.chars() {
                match u8::try_from(c as u32) {
                    Ok(b) => out.push(b),
                    Err(_) => {
                        let mut tmp = [0u8; 4];
                        let (bytes, _, _) =
                            encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut tmp));
                        out.extend_from_slice(&bytes);
                    }
                }
            }
            Cow::Owned(out)
        }
    }
}

/// Writes a database in the current (v17) format, whatever version it was read from.
pub struct TextdumpWriter<'a, W: io::Write> {
    writer: W,
    db: &'a MooDatabase,
    encoding_mode: EncodingMode,
    newline: &'static str,
    waifs: WaifInterner,
}

impl<'a, W: io::Write> TextdumpWriter<'a, W> {
    pub fn new(writer: W, db: &'a MooDatabase, options: &WriterOptions) -> Self {
        let line_ending = options.line_ending.unwrap_or(db.line_ending);
        Self {
            writer,
            db,
            encoding_mode: options.encoding,
            newline: line_ending.as_str(),
            waifs: WaifInterner::new(options.waif_index_mode),
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), EncodeError> {
        let bytes = encode_str(line, self.encoding_mode);
        self.writer.write_all(&bytes)?;
        self.writer.write_all(self.newline.as_bytes())?;
        Ok(())
    }

    fn write_num(&mut self, n: i64) -> Result<(), EncodeError> {
        self.write_line(&n.to_string())
    }

    fn write_count(&mut self, n: usize) -> Result<(), EncodeError> {
        self.write_line(&n.to_string())
    }

    fn write_obj(&mut self, o: Objid) -> Result<(), EncodeError> {
        self.write_num(o.0)
    }

    /// Write a value with its type tag.
    pub fn write_var(&mut self, v: &Var) -> Result<(), EncodeError> {
        self.write_num(v.type_tag().tag())?;
        self.write_var_value(v)
    }

    /// Write a value's payload only, for places where the tag shares a line with something
    /// else.
    fn write_var_value(&mut self, v: &Var) -> Result<(), EncodeError> {
        match v {
            Var::Int(i) | Var::Err(i) | Var::Catch(i) | Var::Finally(i) | Var::Anon(i) => {
                self.write_num(*i)
            }
            Var::Bool(b) => self.write_num(i64::from(*b)),
            Var::Float(f) => self.write_line(&format_float(*f)),
            Var::Str(s) => self.write_line(s),
            Var::Obj(o) => self.write_obj(*o),
            Var::List(l) => {
                self.write_count(l.len())?;
                for item in l {
                    self.write_var(item)?;
                }
                Ok(())
            }
            Var::Map(m) => {
                self.write_count(m.len())?;
                for (k, value) in m {
                    if matches!(k, Var::List(_) | Var::Map(_) | Var::Clear | Var::None) {
                        return Err(EncodeError::UnsupportedValueKind {
                            kind: k.type_name(),
                            position: "a map key",
                        });
                    }
                    self.write_var(k)?;
                    self.write_var(value)?;
                }
                Ok(())
            }
            Var::Waif(w) => self.write_waif(*w),
            Var::Clear | Var::None => Ok(()),
        }
    }

    fn write_waif(&mut self, w: WaifRef) -> Result<(), EncodeError> {
        let db = self.db;
        let Some(waif) = db.waifs.get(&w.0) else {
            return Err(EncodeError::DanglingWaifReference(w.0));
        };
        match self.waifs.intern(w.0) {
            Interned::Reference(index) => {
                self.write_line(&format!("r {index}"))?;
            }
            Interned::Define(index) => {
                self.write_line(&format!("c {index}"))?;
                self.write_obj(waif.class)?;
                self.write_obj(waif.owner)?;
                self.write_num(waif.propdefs_length)?;
                for (slot, value) in &waif.props {
                    self.write_num(*slot)?;
                    self.write_var(value)?;
                }
                self.write_num(-1)?;
            }
        }
        self.write_line(".")
    }

    fn write_objid_list(&mut self, ids: &[Objid]) -> Result<(), EncodeError> {
        self.write_num(VarType::TYPE_LIST.tag())?;
        self.write_count(ids.len())?;
        for id in ids {
            self.write_num(VarType::TYPE_OBJ.tag())?;
            self.write_obj(*id)?;
        }
        Ok(())
    }

    fn write_object(&mut self, object: &MooObject) -> Result<(), EncodeError> {
        self.write_line(&format!("#{}", object.id))?;
        self.write_line(&object.name)?;
        self.write_num(object.flags)?;
        self.write_obj(object.owner)?;
        self.write_var(&object.location)?;
        self.write_var(&object.last_move)?;
        self.write_objid_list(&object.contents)?;
        // A single parent is written bare; none or several as a list.
        match object.parents.as_slice() {
            [parent] => {
                self.write_num(VarType::TYPE_OBJ.tag())?;
                self.write_obj(*parent)?;
            }
            parents => self.write_objid_list(parents)?,
        }
        self.write_objid_list(&object.children)?;

        self.write_count(object.verbs.len())?;
        for verb in &object.verbs {
            self.write_line(&verb.name)?;
            self.write_obj(verb.owner)?;
            self.write_num(verb.perms)?;
            self.write_num(verb.prep)?;
        }

        if object.propdefs_count > object.properties.len() {
            return Err(EncodeError::PropdefsOverflow {
                object: object.objid(),
                declared: object.propdefs_count,
                present: object.properties.len(),
            });
        }
        self.write_count(object.propdefs_count)?;
        for prop in object.defined_properties() {
            self.write_line(&prop.name)?;
        }
        self.write_count(object.properties.len())?;
        for prop in &object.properties {
            self.write_var(&prop.value)?;
            self.write_obj(prop.owner)?;
            self.write_num(prop.perms)?;
        }
        Ok(())
    }

    fn write_objects(&mut self) -> Result<(), EncodeError> {
        let db = self.db;
        self.write_count(db.total_objects)?;
        for id in 0..db.total_objects as i64 {
            if db.recycled_objects.contains(&id) {
                self.write_line(&format!("# {id} recycled"))?;
                continue;
            }
            match db.objects.get(&id) {
                Some(object) if !object.anon => self.write_object(object)?,
                _ => return Err(EncodeError::MissingObject(id)),
            }
        }

        let anonymous: Vec<&MooObject> = db.anonymous_objects().collect();
        if !anonymous.is_empty() {
            self.write_count(anonymous.len())?;
            for object in anonymous {
                self.write_object(object)?;
            }
        }
        self.write_num(0)
    }

    fn write_programs(&mut self) -> Result<(), EncodeError> {
        let db = self.db;
        self.write_count(db.program_count())?;
        for object in db.objects_in_write_order() {
            for (index, verb) in object.verbs.iter().enumerate() {
                let Some(code) = &verb.code else {
                    continue;
                };
                self.write_line(&format!("#{}:{index}", object.id))?;
                self.write_code(code)?;
            }
        }
        Ok(())
    }

    fn write_code(&mut self, code: &[String]) -> Result<(), EncodeError> {
        for line in code {
            self.write_line(line)?;
        }
        self.write_line(".")
    }

    fn write_rt_env(&mut self, rt_env: &[(String, Var)]) -> Result<(), EncodeError> {
        self.write_line(&format!("{} variables", rt_env.len()))?;
        for (name, value) in rt_env {
            self.write_line(name)?;
            self.write_var(value)?;
        }
        Ok(())
    }

    fn write_activation_info(&mut self, info: &ActivationInfo) -> Result<(), EncodeError> {
        self.write_var(&info.temp_value)?;
        self.write_var(&info.temp_this)?;
        self.write_var(&info.temp_vloc)?;
        self.write_num(info.threaded)?;
        self.write_line(&format!(
            "{} {} {} {} {} {} {} {} {}",
            info.this,
            info.unused1,
            info.unused2,
            info.player,
            info.unused3,
            info.programmer,
            info.vloc,
            info.unused4,
            info.debug
        ))?;
        for placeholder in ["No", "More", "Parse", "Infos"] {
            self.write_line(placeholder)?;
        }
        self.write_line(&info.verb)?;
        self.write_line(&info.verbname)
    }

    fn write_activation(&mut self, activation: &Activation) -> Result<(), EncodeError> {
        self.write_line(&format!("language version {}", activation.lang_version))?;
        self.write_code(&activation.code)?;
        self.write_rt_env(&activation.rt_env)?;
        self.write_line(&format!("{} rt_stack slots in use", activation.stack.len()))?;
        for v in &activation.stack {
            self.write_var(v)?;
        }
        self.write_activation_info(&activation.info)?;
        self.write_var(&activation.temp_end)?;
        self.write_line(&format!(
            "{} {} {}",
            activation.pc, activation.bi_func_pc, activation.error_pc
        ))?;
        if activation.bi_func_pc != 0 {
            self.write_line(activation.bi_func_name.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }

    fn write_vm(&mut self, task_id: i64, vm: &Vm) -> Result<(), EncodeError> {
        if vm.stack.is_empty() {
            return Err(EncodeError::EmptyStack(task_id));
        }
        self.write_var(&vm.locals)?;
        self.write_line(&format!(
            "{} {} {} {}",
            vm.stack.len() - 1,
            vm.vector,
            vm.func_id,
            vm.max_stackframes
        ))?;
        for activation in &vm.stack {
            self.write_activation(activation)?;
        }
        Ok(())
    }

    fn write_queued_task(&mut self, task: &QueuedTask) -> Result<(), EncodeError> {
        self.write_line(&format!(
            "{} {} {} {}",
            task.unused, task.first_lineno, task.start_time, task.id
        ))?;
        self.write_activation_info(&task.activation)?;
        self.write_rt_env(&task.rt_env)?;
        self.write_code(&task.code)
    }

    fn write_suspended_task(&mut self, task: &SuspendedTask) -> Result<(), EncodeError> {
        match &task.value {
            Some(value) => {
                self.write_line(&format!(
                    "{} {} {}",
                    task.start_time,
                    task.id,
                    value.type_tag().tag()
                ))?;
                self.write_var_value(value)?;
            }
            None => self.write_line(&format!("{} {}", task.start_time, task.id))?,
        }
        self.write_vm(task.id, &task.vm)
    }

    fn write_interrupted_task(&mut self, task: &InterruptedTask) -> Result<(), EncodeError> {
        self.write_line(&format!("{} {}", task.id, task.status))?;
        self.write_vm(task.id, &task.vm)
    }

    fn write_task_queue(&mut self) -> Result<(), EncodeError> {
        let db = self.db;
        self.write_line(&format!("{} clocks", db.clocks.len()))?;
        for clock in &db.clocks {
            self.write_line(clock)?;
        }
        self.write_line(&format!("{} queued tasks", db.queued_tasks.len()))?;
        for task in &db.queued_tasks {
            self.write_queued_task(task)?;
        }
        self.write_line(&format!("{} suspended tasks", db.suspended_tasks.len()))?;
        for task in &db.suspended_tasks {
            self.write_suspended_task(task)?;
        }
        self.write_line(&format!("{} interrupted tasks", db.interrupted_tasks.len()))?;
        for task in &db.interrupted_tasks {
            self.write_interrupted_task(task)?;
        }
        Ok(())
    }

    fn write_connections(&mut self) -> Result<(), EncodeError> {
        let db = self.db;
        let suffix = if db.connections_with_listeners {
            " with listeners"
        } else {
            ""
        };
        self.write_line(&format!("{} active connections{suffix}", db.connections.len()))?;
        for connection in &db.connections {
            self.write_line(connection)?;
        }
        Ok(())
    }

    pub fn write_textdump(&mut self) -> Result<(), EncodeError> {
        let db = self.db;
        self.write_line(&CURRENT_VERSION.banner())?;

        self.write_count(db.players.len())?;
        for player in &db.players {
            self.write_obj(*player)?;
        }

        self.write_line(&format!(
            "{} values pending finalization",
            db.pending_anon_ids.len()
        ))?;
        for id in &db.pending_anon_ids {
            self.write_var(&Var::Anon(*id))?;
        }

        self.write_task_queue()?;
        self.write_connections()?;
        self.write_objects()?;
        self.write_programs()?;
        self.writer.flush()?;

        info!(
            "wrote {} objects, {} waifs",
            db.objects.len(),
            self.waifs.written_count()
        );
        if db.version != CURRENT_VERSION {
            debug!("uplifted from {} to {}", db.version, CURRENT_VERSION);
        }
        Ok(())
    }
}
