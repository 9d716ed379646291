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

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::PathBuf;

    use moodb_textdump::{
        DbVersion, DecodeError, LineEnding, MooDatabase, MooObject, PF_READ, PF_WRITE, Property,
        ReaderOptions, Verb, Waif, WaifIndexMode, WriterOptions, decode, decode_with_report,
        encode_to_vec, encode_with,
    };
    use moodb_var::{NOTHING, Objid, Var, v_int, v_list, v_obj, v_str, v_waif};

    fn fixture(name: &str) -> Vec<u8> {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        fs::read(manifest_dir.join("tests/fixtures").join(name)).unwrap()
    }

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn count_lines(text: &str, needle: &str) -> usize {
        text.lines().filter(|l| *l == needle).count()
    }

    /// A small v17 world: #0 system object, #1 root, #2 a room holding #3, the only player.
    fn small_world() -> MooDatabase {
        let mut db = MooDatabase::new();
        db.total_objects = 4;
        db.total_players = 1;
        db.players = vec![Objid(3)];

        let mut root = MooObject::new(1, "Root Class");
        root.owner = Objid(3);
        root.properties = vec![Property {
            name: "description".into(),
            value: v_str(""),
            owner: Objid(3),
            perms: PF_READ,
        }];
        root.propdefs_count = 1;
        root.children = vec![Objid(0), Objid(2), Objid(3)];

        let mut system = MooObject::new(0, "System Object");
        system.owner = Objid(3);
        system.parents = vec![Objid(1)];
        system.properties = vec![
            Property {
                name: "counter".into(),
                value: v_int(5),
                owner: Objid(3),
                perms: PF_READ | PF_WRITE,
            },
            Property {
                name: "description".into(),
                value: Var::Clear,
                owner: Objid(3),
                perms: PF_READ,
            },
        ];
        system.propdefs_count = 1;

        let mut room = MooObject::new(2, "Room");
        room.owner = Objid(3);
        room.parents = vec![Objid(1)];
        room.contents = vec![Objid(3)];
        room.properties = vec![Property {
            name: "description".into(),
            value: v_str("A room."),
            owner: Objid(3),
            perms: PF_READ,
        }];

        let mut wizard = MooObject::new(3, "Wizard");
        wizard.owner = Objid(3);
        wizard.flags = 7;
        wizard.parents = vec![Objid(1)];
        wizard.location = v_obj(2);
        wizard.properties = vec![Property {
            name: "description".into(),
            value: Var::Clear,
            owner: Objid(3),
            perms: PF_READ,
        }];

        for o in [system, root, room, wizard] {
            db.objects.insert(o.id, o);
        }
        db
    }

    fn verb(object: i64, name: &str, code: Option<&[&str]>) -> Verb {
        Verb {
            name: name.into(),
            owner: Objid(3),
            perms: 173,
            prep: -1,
            object: Objid(object),
            code: code.map(|lines| lines.iter().map(|l| l.to_string()).collect()),
        }
    }

    /// Load the legacy fixture and confirm the linked lists and inherited names came out right.
    #[test]
    fn load_legacy_minimal() {
        let db = decode(&fixture("minimal_v4.db")[..]).unwrap();
        assert_eq!(db.version, DbVersion::DbvBfbugFixed);
        assert_eq!(db.total_objects, 4);
        assert_eq!(db.total_verbs, 2);
        assert_eq!(db.players, vec![Objid(3)]);
        assert!(db.object_count_consistent());

        let root = &db.objects[&1];
        assert_eq!(root.name, "Root Class");
        assert_eq!(root.parents, vec![NOTHING]);
        assert_eq!(root.children, vec![Objid(0), Objid(2), Objid(3)]);

        let room = &db.objects[&2];
        assert_eq!(room.contents, vec![Objid(3)]);
        assert_eq!(room.properties[0].name, "description");
        assert_eq!(room.properties[0].value, v_str("A plain room."));

        let wizard = &db.objects[&3];
        assert_eq!(wizard.location, v_obj(2));
        assert_eq!(wizard.last_move, v_obj(-1));
        assert_eq!(wizard.properties[0].value, Var::Clear);

        let system = &db.objects[&0];
        assert_eq!(
            system.verbs[0].code,
            Some(vec!["return #3;".to_string()])
        );
        assert!(db.connections.is_empty());
    }

    #[test]
    fn legacy_database_is_written_as_v17() {
        let db = decode(&fixture("minimal_v4.db")[..]).unwrap();
        let written = encode_to_vec(&db).unwrap();
        similar_asserts::assert_eq!(
            as_text(&written),
            as_text(&fixture("minimal_v4_uplifted.db"))
        );
    }

    #[test]
    fn toast_v17_round_trips_line_for_line() {
        let original = fixture("toast_v17.db");
        let db = decode(&original[..]).unwrap();
        let written = encode_to_vec(&db).unwrap();
        similar_asserts::assert_eq!(as_text(&written), as_text(&original));
    }

    #[test]
    fn toast_v17_contents() {
        let (db, dangling) =
            decode_with_report(&fixture("toast_v17.db")[..], &ReaderOptions::default()).unwrap();
        assert!(dangling.is_empty());
        assert_eq!(db.version, DbVersion::DbvBool);
        assert_eq!(db.total_objects, 5);
        assert!(db.recycled_objects.contains(&4));
        assert_eq!(db.pending_anon_ids, vec![5]);
        assert!(db.connections_with_listeners);
        assert_eq!(db.connections, vec!["3 0".to_string()]);

        let anon = &db.objects[&5];
        assert!(anon.anon);
        assert_eq!(anon.parents, vec![Objid(1), Objid(2)]);
        assert_eq!(anon.properties[0].name, "description");

        // One waif, defined once and referenced once.
        assert_eq!(db.waifs.len(), 1);
        assert_eq!(db.waifs[&0].class, Objid(1));
        let Var::Map(config) = &db.objects[&0].properties[0].value else {
            panic!("config should be a map");
        };
        assert_eq!(config[0].1, v_waif(0));
        assert_eq!(config[1].1, v_waif(0));
        assert_eq!(config[3].1, Var::Bool(true));

        // Present-but-empty code is distinct from absent code.
        assert_eq!(db.objects[&3].verbs[0].code, Some(vec![]));
        assert_eq!(db.program_count(), 3);

        let queued = &db.queued_tasks[0];
        assert_eq!(queued.id, 42);
        assert_eq!(queued.code, vec!["return x;".to_string()]);
        assert_eq!(queued.rt_env, vec![("x".to_string(), v_int(5))]);

        let suspended = &db.suspended_tasks[0];
        assert_eq!(suspended.value, Some(v_int(0)));
        assert_eq!(suspended.vm.stack.len(), 1);
        assert_eq!(
            suspended.vm.stack[0].bi_func_name.as_deref(),
            Some("suspend")
        );

        let interrupted = &db.interrupted_tasks[0];
        assert_eq!(interrupted.status, "interrupted");
        assert_eq!(interrupted.vm.stack[0].stack, vec![Var::Catch(2)]);
    }

    #[test]
    fn decode_encode_decode_is_stable() {
        let db = decode(&fixture("toast_v17.db")[..]).unwrap();
        let again = decode(&encode_to_vec(&db).unwrap()[..]).unwrap();
        pretty_assertions::assert_eq!(db, again);

        let legacy = decode(&fixture("minimal_v4.db")[..]).unwrap();
        let once = encode_to_vec(&legacy).unwrap();
        let twice = encode_to_vec(&decode(&once[..]).unwrap()).unwrap();
        similar_asserts::assert_eq!(as_text(&once), as_text(&twice));
    }

    #[test]
    fn crlf_is_preserved() {
        let original = as_text(&fixture("toast_v17.db")).replace('\n', "\r\n");
        let db = decode(original.as_bytes()).unwrap();
        assert_eq!(db.line_ending, LineEnding::CrLf);
        assert_eq!(db.objects[&0].name, "System Object");
        let written = encode_to_vec(&db).unwrap();
        similar_asserts::assert_eq!(as_text(&written), original);

        let options = WriterOptions {
            line_ending: Some(LineEnding::Lf),
            ..Default::default()
        };
        let mut lf = vec![];
        encode_with(&db, &mut lf, &options).unwrap();
        similar_asserts::assert_eq!(as_text(&lf), as_text(&fixture("toast_v17.db")));
    }

    #[test]
    fn truncated_input_fails() {
        let original = fixture("toast_v17.db");
        let half = &original[..original.len() / 2];
        let cut = &half[..half.iter().rposition(|b| *b == b'\n').unwrap() + 1];
        assert!(matches!(
            decode(cut),
            Err(DecodeError::TruncatedInput(_))
        ));
    }

    #[test]
    fn program_for_undeclared_object_fails() {
        let text = as_text(&fixture("toast_v17.db")).replace("#3:0\n", "#9:0\n");
        let err = decode(text.as_bytes()).unwrap_err();
        let DecodeError::DanglingReference { target, ctx } = err else {
            panic!("expected a dangling reference, got {err:?}");
        };
        assert_eq!(target, Objid(9));
        assert_eq!(ctx.section, "verbs");
    }

    #[test]
    fn programs_beyond_the_declared_count_fail() {
        let text =
            as_text(&fixture("toast_v17.db")).replace("\n0\n3\n#0:0\n", "\n0\n2\n#0:0\n");
        let err = decode(text.as_bytes()).unwrap_err();
        let DecodeError::CountMismatch {
            what,
            expected,
            actual,
            ..
        } = err
        else {
            panic!("expected a count mismatch, got {err:?}");
        };
        assert_eq!(what, "verb programs");
        assert_eq!(expected, 2);
        assert_eq!(actual, 3);
    }

    #[test]
    fn trailing_blank_lines_are_accepted() {
        let mut text = as_text(&fixture("toast_v17.db"));
        text.push_str("\n\n");
        let db = decode(text.as_bytes()).unwrap();
        assert_eq!(db.program_count(), 3);
    }

    #[test]
    fn legacy_data_after_connections_fails() {
        let mut text = as_text(&fixture("minimal_v4.db"));
        text.push_str("0 active connections\nleftover\n");
        assert!(matches!(
            decode(text.as_bytes()),
            Err(DecodeError::Parse(..))
        ));
    }

    #[test]
    fn anonymous_object_reusing_a_dense_id_fails() {
        for id in ["#2", "#4"] {
            let text = as_text(&fixture("toast_v17.db"))
                .replace("#5\n\n256\n", &format!("{id}\n\n256\n"));
            let err = decode(text.as_bytes()).unwrap_err();
            let DecodeError::DuplicateObject { id: dup, ctx } = err else {
                panic!("expected a duplicate object, got {err:?}");
            };
            assert_eq!(format!("#{dup}"), id);
            assert_eq!(ctx.section, "anonymous objects");
        }
    }

    /// The v14 fixture is the v17 one minus the fields added since: no `last_move`, no
    /// `threaded` flag on frames, and an integer where v17 stores a boolean.
    #[test]
    fn toast_v14_matches_v17_apart_from_newer_fields() {
        let v14 = decode(&fixture("toast_v14.db")[..]).unwrap();
        assert_eq!(v14.version, DbVersion::DbvWaif);
        assert_eq!(v14.objects[&3].last_move, v_obj(-1));
        assert_eq!(v14.interrupted_tasks.len(), 1);
        assert!(v14.objects[&5].anon);
        assert_eq!(v14.waifs.len(), 1);

        let mut v17 = decode(&fixture("toast_v17.db")[..]).unwrap();
        v17.version = v14.version;
        v17.version_string = v14.version_string.clone();
        v17.objects.get_mut(&3).unwrap().last_move = v_obj(-1);
        let Var::Map(config) = &mut v17.objects.get_mut(&0).unwrap().properties[0].value else {
            panic!("config should be a map");
        };
        config[3].1 = v_int(1);
        pretty_assertions::assert_eq!(v14, v17);
    }

    #[test]
    fn toast_v14_is_uplifted_on_write() {
        let v14 = decode(&fixture("toast_v14.db")[..]).unwrap();
        let text = as_text(&encode_to_vec(&v14).unwrap());
        assert!(text.starts_with("** LambdaMOO Database, Format Version 17 **\n"));
        let again = decode(text.as_bytes()).unwrap();
        assert_eq!(again.version, DbVersion::DbvBool);
        assert_eq!(again.objects[&3].last_move, v_obj(-1));
        assert_eq!(again.suspended_tasks[0].vm.stack[0].info.threaded, 0);
        assert_eq!(again.objects, v14.objects);
    }

    #[test]
    fn boolean_in_a_v14_database_fails() {
        let text =
            as_text(&fixture("toast_v14.db")).replace("enabled\n0\n1\n", "enabled\n14\n1\n");
        let err = decode(text.as_bytes()).unwrap_err();
        let DecodeError::MalformedTag { tag, ctx } = err else {
            panic!("expected a malformed tag, got {err:?}");
        };
        assert_eq!(tag, 14);
        assert_eq!(ctx.object, Some(0));
    }

    #[test]
    fn program_for_missing_verb_index_fails() {
        let text = as_text(&fixture("toast_v17.db")).replace("#3:0\n", "#3:4\n");
        assert!(matches!(
            decode(text.as_bytes()),
            Err(DecodeError::CountMismatch { what: "verbs", .. })
        ));
    }

    #[test]
    fn illegal_tag_fails_with_context() {
        // The first typed value in the object table is #0's location.
        let text = as_text(&fixture("toast_v17.db")).replace(
            "#0\nSystem Object\n16\n3\n1\n-1\n",
            "#0\nSystem Object\n16\n3\n11\n-1\n",
        );
        let err = decode(text.as_bytes()).unwrap_err();
        let DecodeError::MalformedTag { tag, ctx } = err else {
            panic!("expected a malformed tag, got {err:?}");
        };
        assert_eq!(tag, 11);
        assert_eq!(ctx.object, Some(0));
        assert_eq!(ctx.field, Some("location"));
    }

    #[test]
    fn dangling_field_references_are_reported_not_fatal() {
        let mut db = small_world();
        db.objects.get_mut(&3).unwrap().location = v_obj(99);
        let bytes = encode_to_vec(&db).unwrap();
        let (decoded, dangling) =
            decode_with_report(&bytes[..], &ReaderOptions::default()).unwrap();
        assert_eq!(decoded.objects[&3].location, v_obj(99));
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].target, Objid(99));
        assert_eq!(dangling[0].path, "#3.location");
    }

    #[test]
    fn property_value_and_permissions_survive() {
        let db = small_world();
        let decoded = decode(&encode_to_vec(&db).unwrap()[..]).unwrap();
        let counter = decoded.objects[&0].find_property("counter").unwrap();
        assert_eq!(counter.value, v_int(5));
        assert_eq!(counter.perms, 3);
        assert_eq!(counter.owner, Objid(3));
        // Inherited slot names come back from the ancestry, not from the file.
        assert_eq!(decoded.objects[&0].properties[1].name, "description");
        pretty_assertions::assert_eq!(decoded, db);
    }

    #[test]
    fn verb_code_three_states() {
        let mut db = small_world();
        db.objects.get_mut(&0).unwrap().verbs = vec![
            verb(0, "absent", None),
            verb(0, "empty", Some(&[])),
            verb(0, "full", Some(&["return 1;", "", "  return 2;"])),
        ];
        let bytes = encode_to_vec(&db).unwrap();
        let text = as_text(&bytes);
        assert!(!text.contains("#0:0\n"));
        assert!(text.contains("#0:1\n.\n"));
        assert!(text.contains("#0:2\nreturn 1;\n\n  return 2;\n.\n"));

        let decoded = decode(&bytes[..]).unwrap();
        assert_eq!(decoded.total_verbs, 2);
        let verbs = &decoded.objects[&0].verbs;
        assert_eq!(verbs[0].code, None);
        assert_eq!(verbs[1].code, Some(vec![]));
        assert_eq!(verbs[2].code.as_ref().map(|c| c.len()), Some(3));
    }

    #[test]
    fn shared_waif_is_defined_once() {
        let mut db = small_world();
        db.waifs.insert(
            12,
            Waif {
                class: Objid(1641),
                owner: Objid(3),
                propdefs_length: 1,
                props: vec![(0, v_str("shared"))],
            },
        );
        let system = db.objects.get_mut(&0).unwrap();
        system.properties[0].value = v_list(&[v_waif(12), v_waif(12)]);
        db.objects.get_mut(&2).unwrap().properties[0].value = v_waif(12);

        let bytes = encode_to_vec(&db).unwrap();
        let text = as_text(&bytes);
        assert_eq!(count_lines(&text, "c 0"), 1);
        assert_eq!(count_lines(&text, "r 0"), 2);
        assert_eq!(count_lines(&text, "1641"), 1);

        // Sequential numbering renumbers the table; the structure is otherwise intact.
        let decoded = decode(&bytes[..]).unwrap();
        assert_eq!(decoded.waifs.len(), 1);
        assert_eq!(decoded.waifs[&0].class, Objid(1641));
        assert_eq!(decoded.objects[&2].properties[0].value, v_waif(0));

        let options = WriterOptions {
            waif_index_mode: WaifIndexMode::Preserve,
            ..Default::default()
        };
        let mut preserved = vec![];
        encode_with(&db, &mut preserved, &options).unwrap();
        let preserved = as_text(&preserved);
        assert_eq!(count_lines(&preserved, "c 12"), 1);
        assert_eq!(count_lines(&preserved, "r 12"), 2);
    }

    #[test]
    fn anonymous_objects_go_after_the_dense_table() {
        let mut db = small_world();
        let mut anon = MooObject::new(7, "");
        anon.anon = true;
        anon.owner = Objid(3);
        anon.parents = vec![Objid(1)];
        anon.properties = vec![Property {
            name: "description".into(),
            value: Var::Clear,
            owner: Objid(3),
            perms: PF_READ,
        }];
        anon.verbs = vec![verb(7, "anon_verb", Some(&["return this;"]))];
        db.objects.insert(7, anon);
        db.pending_anon_ids = vec![7];
        db.total_verbs = 1;
        db.objects.get_mut(&0).unwrap().properties[0].value = Var::Anon(7);

        let bytes = encode_to_vec(&db).unwrap();
        let text = as_text(&bytes);
        assert!(text.contains("1 values pending finalization\n12\n7\n"));
        assert!(text.contains("#7:0\nreturn this;\n.\n"));

        let decoded = decode(&bytes[..]).unwrap();
        assert!(decoded.objects[&7].anon);
        assert_eq!(decoded.total_objects, 4);
        assert!(decoded.object_count_consistent());
        pretty_assertions::assert_eq!(decoded, db);
    }

    #[test]
    fn latin1_bytes_are_transparent() {
        let original = fixture("toast_v17.db");
        let mut patched = vec![];
        let needle = b"A plain room.";
        let at = original
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        patched.extend_from_slice(&original[..at]);
        patched.extend_from_slice(b"Caf\xe9 \x93quoted\x94");
        patched.extend_from_slice(&original[at + needle.len()..]);

        let db = decode(&patched[..]).unwrap();
        assert_eq!(
            db.objects[&2].properties[0].value,
            v_str("Caf\u{e9} \u{93}quoted\u{94}")
        );
        assert_eq!(encode_to_vec(&db).unwrap(), patched);
    }
}
