// ABOUTME: Round-trip tests for the archive-parse export strategy
// ABOUTME: Builds synthetic custom-format archives and checks the CSV output

use db_backup_exporter::archive::Archive;
use db_backup_exporter::export::ArchiveExport;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::path::PathBuf;

/// One table's worth of synthetic archive content.
struct TableFixture {
    namespace: &'static str,
    tag: &'static str,
    columns: &'static [&'static str],
    rows: &'static [&'static [&'static str]],
}

/// Serializer mirroring the custom-format encodings: integers as a sign byte
/// plus four little-endian bytes, strings length-prefixed with -1 as null.
#[derive(Default)]
struct ArchiveBuilder {
    buf: Vec<u8>,
}

impl ArchiveBuilder {
    fn int(&mut self, value: i64) {
        self.buf.push(u8::from(value < 0));
        let abs = value.unsigned_abs();
        self.buf.extend_from_slice(&(abs as u32).to_le_bytes());
    }

    fn string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.int(s.len() as i64);
                self.buf.extend_from_slice(s.as_bytes());
            }
            None => self.int(-1),
        }
    }

    fn offset(&mut self, state: u8, value: u64) {
        self.buf.push(state);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
}

fn copy_payload(fixture: &TableFixture) -> Vec<u8> {
    let mut text = String::new();
    for row in fixture.rows {
        text.push_str(&row.join("\t"));
        text.push('\n');
    }
    text.push_str("\\.\n");
    text.into_bytes()
}

fn data_block(dump_id: i64, payload: &[u8]) -> Vec<u8> {
    let mut b = ArchiveBuilder::default();
    b.buf.push(1); // table data block
    b.int(dump_id);
    b.int(payload.len() as i64);
    b.buf.extend_from_slice(payload);
    b.int(0);
    b.buf
}

/// Build a complete layout-1.14 custom archive with one TABLE DATA entry per
/// fixture plus one schema-definition entry that carries no data.
fn build_archive(fixtures: &[TableFixture], compress: bool) -> Vec<u8> {
    let payloads: Vec<Vec<u8>> = fixtures
        .iter()
        .map(|f| {
            let raw = copy_payload(f);
            if compress {
                let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(&raw).unwrap();
                enc.finish().unwrap()
            } else {
                raw
            }
        })
        .collect();

    let assemble = |offsets: &[u64]| -> Vec<u8> {
        let mut b = ArchiveBuilder::default();
        b.buf.extend_from_slice(b"PGDMP");
        b.buf.extend_from_slice(&[1, 14, 0]); // archive layout version
        b.buf.push(4); // integer size
        b.buf.push(8); // offset size
        b.buf.push(1); // custom format
        b.int(if compress { -1 } else { 0 });
        for _ in 0..7 {
            b.int(0); // creation timestamp fields
        }
        b.string(Some("shop"));
        b.string(Some("14.0"));
        b.string(Some("14.0"));

        b.int(fixtures.len() as i64 + 1);

        // A definition-only entry: no dumper, no data offset.
        b.int(900);
        b.int(0);
        b.string(Some("0"));
        b.string(Some("0"));
        b.string(Some("users"));
        b.string(Some("TABLE"));
        b.int(1);
        b.string(Some("CREATE TABLE public.users ();"));
        b.string(Some("DROP TABLE public.users;"));
        b.string(None);
        b.string(Some("public"));
        b.string(None);
        b.string(None); // table access method
        b.string(Some("postgres"));
        b.string(Some("false"));
        b.string(None); // end of dependencies
        b.offset(1, 0); // position not set

        for (i, fixture) in fixtures.iter().enumerate() {
            b.int(1000 + i as i64);
            b.int(1); // had a dumper
            b.string(Some("0"));
            b.string(Some("0"));
            b.string(Some(fixture.tag));
            b.string(Some("TABLE DATA"));
            b.int(2);
            b.string(Some(""));
            b.string(Some(""));
            let cols = fixture
                .columns
                .iter()
                .map(|c| format!("\"{}\"", c))
                .collect::<Vec<_>>()
                .join(", ");
            b.string(Some(&format!(
                "COPY \"{}\".\"{}\" ({}) FROM stdin;\n",
                fixture.namespace, fixture.tag, cols
            )));
            b.string(Some(fixture.namespace));
            b.string(None);
            b.string(None); // table access method
            b.string(Some("postgres"));
            b.string(Some("false"));
            b.string(None); // end of dependencies
            b.offset(2, offsets.get(i).copied().unwrap_or(0));
        }
        b.buf
    };

    // First pass sizes the header and TOC, second pass patches real offsets.
    let toc_len = assemble(&vec![0; fixtures.len()]).len() as u64;
    let mut offsets = Vec::new();
    let mut position = toc_len;
    for (i, payload) in payloads.iter().enumerate() {
        offsets.push(position);
        position += data_block(1000 + i as i64, payload).len() as u64;
    }

    let mut bytes = assemble(&offsets);
    for (i, payload) in payloads.iter().enumerate() {
        bytes.extend_from_slice(&data_block(1000 + i as i64, payload));
    }
    bytes
}

fn write_archive(dir: &std::path::Path, bytes: &[u8]) -> PathBuf {
    let path = dir.join("shop_20260829.backup");
    std::fs::write(&path, bytes).unwrap();
    path
}

const USERS: TableFixture = TableFixture {
    namespace: "public",
    tag: "users",
    columns: &["id", "name"],
    rows: &[&["1", "a"], &["2", "b"]],
};

#[test]
fn load_parses_catalog_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), &build_archive(&[USERS], false));

    let archive = Archive::load(&path).unwrap();
    assert_eq!(archive.version, (1, 14, 0));
    assert_eq!(archive.dbname.as_deref(), Some("shop"));
    assert_eq!(archive.entries.len(), 2);

    let data_entries: Vec<_> = archive.entries.iter().filter(|e| e.is_table_data()).collect();
    assert_eq!(data_entries.len(), 1);
    assert_eq!(data_entries[0].namespace.as_deref(), Some("public"));
    assert_eq!(data_entries[0].tag.as_deref(), Some("users"));
    assert!(data_entries[0].offset.is_some());
}

#[tokio::test]
async fn round_trip_produces_header_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), &build_archive(&[USERS], false));

    let out_dir = dir.path().join("csv");
    let results = ArchiveExport::new(path).export_all(&out_dir).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].ok);
    assert_eq!(results[0].rows, Some(2));
    assert_eq!(results[0].table.to_string(), "public.users");

    let csv = std::fs::read_to_string(out_dir.join("public.users.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec!["id,name", "1,a", "2,b"]);
}

#[tokio::test]
async fn round_trip_handles_compressed_archives() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), &build_archive(&[USERS], true));

    let out_dir = dir.path().join("csv");
    let results = ArchiveExport::new(path).export_all(&out_dir).await.unwrap();

    assert_eq!(results.len(), 1);
    let csv = std::fs::read_to_string(out_dir.join("public.users.csv")).unwrap();
    assert_eq!(csv.lines().collect::<Vec<_>>(), vec!["id,name", "1,a", "2,b"]);
}

#[tokio::test]
async fn archive_without_table_data_exports_zero_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), &build_archive(&[], false));

    let out_dir = dir.path().join("csv");
    let results = ArchiveExport::new(path).export_all(&out_dir).await.unwrap();

    assert!(results.is_empty());
    assert!(out_dir.is_dir(), "export dir is created even when empty");
}

#[tokio::test]
async fn a_corrupted_table_does_not_stop_the_remaining_exports() {
    const ORDERS: TableFixture = TableFixture {
        namespace: "public",
        tag: "orders",
        columns: &["id", "total"],
        rows: &[&["1", "9.50"]],
    };
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = build_archive(&[USERS, ORDERS], false);

    // Flip the dump id of the first data block so its lookup fails while the
    // second table's block stays intact.
    let users_block = data_block(1000, &copy_payload(&USERS));
    let orders_block = data_block(1001, &copy_payload(&ORDERS));
    let first_block = bytes.len() - users_block.len() - orders_block.len();
    bytes[first_block + 2] ^= 0xff;
    let path = write_archive(dir.path(), &bytes);

    let out_dir = dir.path().join("csv");
    let results = ArchiveExport::new(path).export_all(&out_dir).await.unwrap();
    assert_eq!(results.len(), 2);

    let users = results.iter().find(|r| r.table.name == "users").unwrap();
    assert!(!users.ok, "the corrupted table must be reported as failed");
    assert!(!out_dir.join("public.users.csv").exists());

    let orders = results.iter().find(|r| r.table.name == "orders").unwrap();
    assert!(orders.ok, "the intact table must still be exported");
    let csv = std::fs::read_to_string(out_dir.join("public.orders.csv")).unwrap();
    assert_eq!(csv.lines().collect::<Vec<_>>(), vec!["id,total", "1,9.50"]);
}

#[tokio::test]
async fn null_fields_become_empty_csv_fields() {
    const EVENTS: TableFixture = TableFixture {
        namespace: "audit",
        tag: "events",
        columns: &["id", "note"],
        rows: &[&["1", "\\N"], &["2", "tab\\there"]],
    };
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), &build_archive(&[EVENTS], false));

    let out_dir = dir.path().join("csv");
    let results = ArchiveExport::new(path).export_all(&out_dir).await.unwrap();
    assert_eq!(results[0].rows, Some(2));

    let csv = std::fs::read_to_string(out_dir.join("audit.events.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "id,note");
    assert_eq!(lines[1], "1,");
    // The escaped tab is decoded into a literal tab character.
    assert_eq!(lines[2], "2,tab\there");
}
