//! Volume table records and their List reply layout.
//!
//! Each mounted volume is reported as a fixed block of lines:
//!
//! ```text
//! Entry
//! fsUUID|<uuid>
//! mountData|optSubvol|<bool>
//! mountData|optSubvolID|<bool>
//! mountData|optDump|<bool>
//! mountData|optTestRun|<bool>
//! mountData|mountPoint|<len>|<value>
//! mountData|subvolName|<len>|<value>
//! mountData|dumpFile|<len>|<value>
//! mountData|subvolID|<int>
//! mountData|devices|<len>|<value>
//! ```
//!
//! String fields carry a `<len>` prefix counted in UTF-16 code units, so a
//! value may itself contain the line separator.

use crate::message::{NO_ENTRIES, ProtocolError, Reply, Status};
use crate::wide::utf16_len;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Boolean mount options of a volume.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MountOptions: u8 {
        /// Mount a subvolume selected by name.
        const SUBVOL = 0b0001;
        /// Mount a subvolume selected by ID.
        const SUBVOL_ID = 0b0010;
        /// Dump filesystem trees to `dump_file` while mounting.
        const DUMP = 0b0100;
        /// Validate the volume without keeping it mounted.
        const TEST_RUN = 0b1000;
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Mount configuration of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountData {
    #[serde(default)]
    pub options: MountOptions,
    pub mount_point: String,
    #[serde(default)]
    pub subvol_name: String,
    #[serde(default)]
    pub dump_file: String,
    #[serde(default)]
    pub subvol_id: u64,
    /// Device paths making up the filesystem, in order.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// One row of the volume table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    /// Filesystem UUID in its textual form.
    pub fs_uuid: String,
    pub mount_data: MountData,
}

const ENTRY: &str = "Entry";
const FS_UUID: &str = "fsUUID|";
const MOUNT_DATA: &str = "mountData|";

const FLAG_FIELDS: [(&str, MountOptions); 4] = [
    ("optSubvol", MountOptions::SUBVOL),
    ("optSubvolID", MountOptions::SUBVOL_ID),
    ("optDump", MountOptions::DUMP),
    ("optTestRun", MountOptions::TEST_RUN),
];

fn wire_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn sized_field(name: &str, value: &str) -> String {
    format!("{MOUNT_DATA}{name}|{}|{value}", utf16_len(value))
}

impl VolumeEntry {
    pub fn new(fs_uuid: impl Into<String>, mount_data: MountData) -> Self {
        Self {
            fs_uuid: fs_uuid.into(),
            mount_data,
        }
    }

    /// Append this entry's record block to `lines`.
    pub fn write_record(&self, lines: &mut Vec<String>) {
        let data = &self.mount_data;

        lines.push(ENTRY.to_owned());
        lines.push(format!("{FS_UUID}{}", self.fs_uuid));
        for (name, flag) in FLAG_FIELDS {
            lines.push(format!(
                "{MOUNT_DATA}{name}|{}",
                wire_bool(data.options.contains(flag))
            ));
        }
        lines.push(sized_field("mountPoint", &data.mount_point));
        lines.push(sized_field("subvolName", &data.subvol_name));
        lines.push(sized_field("dumpFile", &data.dump_file));
        lines.push(format!("{MOUNT_DATA}subvolID|{}", data.subvol_id));
        for device in &data.devices {
            lines.push(sized_field("devices", device));
        }
    }
}

/// Build the `Data` reply for a List request, preserving table order.
#[must_use]
pub fn list_reply(entries: &[VolumeEntry]) -> Reply {
    if entries.is_empty() {
        return Reply::data([NO_ENTRIES]);
    }

    let mut lines = Vec::new();
    for entry in entries {
        entry.write_record(&mut lines);
    }
    Reply::data(lines)
}

/// Parse the volume records out of a List reply.
pub fn parse_list_reply(reply: &Reply) -> Result<Vec<VolumeEntry>, ProtocolError> {
    match reply.status() {
        Some(Status::Data) => {}
        Some(Status::Error) => {
            return Err(ProtocolError::MalformedReply(format!(
                "service returned an error: {}",
                reply.body()
            )));
        }
        None => {
            let tag = reply.lines().next().unwrap_or_default();
            return Err(malformed(format!("unknown status tag {tag:?}")));
        }
    }

    let mut cursor = Cursor::new(reply.as_text());
    // Skip the status line
    cursor.line();

    if cursor.rest == NO_ENTRIES {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    while !cursor.is_empty() {
        entries.push(cursor.entry()?);
    }
    Ok(entries)
}

fn malformed(message: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedReply(message.into())
}

/// Position inside List reply text.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Take everything up to the next separator, consuming the separator.
    fn line(&mut self) -> &'a str {
        match self.rest.split_once('\n') {
            Some((line, rest)) => {
                self.rest = rest;
                line
            }
            None => std::mem::take(&mut self.rest),
        }
    }

    fn expect(&mut self, prefix: &str) -> Result<(), ProtocolError> {
        match self.rest.strip_prefix(prefix) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(malformed(format!("expected {prefix:?}"))),
        }
    }

    fn flag(&mut self, name: &str) -> Result<bool, ProtocolError> {
        self.expect(MOUNT_DATA)?;
        self.expect(name)?;
        self.expect("|")?;
        let value = self.line();
        parse_bool(value).ok_or_else(|| malformed(format!("bad {name} value {value:?}")))
    }

    /// Read a `<len>|<value>` pair where `len` counts UTF-16 code units.
    fn sized(&mut self, name: &str) -> Result<String, ProtocolError> {
        self.expect(MOUNT_DATA)?;
        self.expect(name)?;
        self.expect("|")?;

        let (len, rest) = self
            .rest
            .split_once('|')
            .ok_or_else(|| malformed(format!("missing length for {name}")))?;
        let len: usize = len
            .parse()
            .map_err(|_| malformed(format!("bad length {len:?} for {name}")))?;

        let mut units = 0;
        let mut end = 0;
        for ch in rest.chars() {
            if units == len {
                break;
            }
            units += ch.len_utf16();
            end += ch.len_utf8();
        }
        if units != len {
            return Err(malformed(format!("{name} shorter than its length prefix")));
        }

        let value = &rest[..end];
        self.rest = &rest[end..];
        if !self.rest.is_empty() {
            self.expect("\n")?;
        }
        Ok(value.to_owned())
    }

    fn entry(&mut self) -> Result<VolumeEntry, ProtocolError> {
        if self.line() != ENTRY {
            return Err(malformed("expected Entry"));
        }

        self.expect(FS_UUID)?;
        let fs_uuid = self.line().to_owned();

        let mut options = MountOptions::empty();
        for (name, flag) in FLAG_FIELDS {
            options.set(flag, self.flag(name)?);
        }

        let mount_point = self.sized("mountPoint")?;
        let subvol_name = self.sized("subvolName")?;
        let dump_file = self.sized("dumpFile")?;

        self.expect(MOUNT_DATA)?;
        self.expect("subvolID|")?;
        let raw_id = self.line();
        let subvol_id = raw_id
            .parse()
            .map_err(|_| malformed(format!("bad subvolID {raw_id:?}")))?;

        let mut devices = Vec::new();
        while self.rest.starts_with("mountData|devices|") {
            devices.push(self.sized("devices")?);
        }

        Ok(VolumeEntry {
            fs_uuid,
            mount_data: MountData {
                options,
                mount_point,
                subvol_name,
                dump_file,
                subvol_id,
                devices,
            },
        })
    }
}
