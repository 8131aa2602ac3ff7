//! Layout tables and decoders for the well-known kernel record shapes.
//!
//! These are the shapes the correlators are built from: thread and process
//! lifetime, file-name definitions, disk completions, and the configuration
//! records that describe the captured machine. Each shape is a thin table of
//! (offset rule, type) over the cursor primitives; the long tail of other
//! kernel shapes is declared the same way by consumers.

use crate::cursor::{DecodeError, LayoutTable, VersionLayout};
use crate::fixup::{FieldRule, FixupPipeline, IdentityFixup};
use crate::record::{EventKey, RawRecord};

pub mod provider {
    //! Kernel provider identities.
    pub const PROCESS: u64 = 0x3d6f_a8d0_fe05_11d0;
    pub const THREAD: u64 = 0x3d6f_a8d1_fe05_11d0;
    pub const DISK_IO: u64 = 0x3d6f_a8d4_fe05_11d0;
    pub const FILE_IO: u64 = 0x90cb_dc39_4a3e_11d1;
    pub const SYSTEM_CONFIG: u64 = 0x0185_3a65_418f_4f36;
}

pub mod opcode {
    // Lifetime opcodes shared by the process and thread providers. The DC
    // ("data collection") variants are the rundown spellings emitted at
    // capture boundaries for entities that already existed.
    pub const START: u8 = 1;
    pub const STOP: u8 = 2;
    pub const DC_START: u8 = 3;
    pub const DC_STOP: u8 = 4;

    // File naming.
    pub const FILE_NAME: u8 = 0;
    pub const FILE_CREATE: u8 = 32;
    pub const FILE_DELETE: u8 = 35;
    pub const FILE_RUNDOWN: u8 = 36;

    // Disk transfer completions.
    pub const DISK_READ: u8 = 10;
    pub const DISK_WRITE: u8 = 11;

    // System configuration records.
    pub const SYSTEM_PATHS: u8 = 33;
    pub const VOLUME_MAPPING: u8 = 38;
}

pub const THREAD_START: EventKey = EventKey::new(provider::THREAD, 0, opcode::START);
pub const THREAD_STOP: EventKey = EventKey::new(provider::THREAD, 0, opcode::STOP);
pub const THREAD_DC_START: EventKey = EventKey::new(provider::THREAD, 0, opcode::DC_START);
pub const THREAD_DC_STOP: EventKey = EventKey::new(provider::THREAD, 0, opcode::DC_STOP);
pub const PROCESS_START: EventKey = EventKey::new(provider::PROCESS, 0, opcode::START);
pub const PROCESS_STOP: EventKey = EventKey::new(provider::PROCESS, 0, opcode::STOP);
pub const PROCESS_DC_START: EventKey = EventKey::new(provider::PROCESS, 0, opcode::DC_START);
pub const FILE_NAME: EventKey = EventKey::new(provider::FILE_IO, 0, opcode::FILE_NAME);
pub const FILE_CREATE: EventKey = EventKey::new(provider::FILE_IO, 0, opcode::FILE_CREATE);
pub const FILE_DELETE: EventKey = EventKey::new(provider::FILE_IO, 0, opcode::FILE_DELETE);
pub const FILE_RUNDOWN: EventKey = EventKey::new(provider::FILE_IO, 0, opcode::FILE_RUNDOWN);
pub const DISK_READ: EventKey = EventKey::new(provider::DISK_IO, 0, opcode::DISK_READ);
pub const DISK_WRITE: EventKey = EventKey::new(provider::DISK_IO, 0, opcode::DISK_WRITE);
pub const SYSTEM_PATHS: EventKey = EventKey::new(provider::SYSTEM_CONFIG, 0, opcode::SYSTEM_PATHS);
pub const VOLUME_MAPPING: EventKey =
    EventKey::new(provider::SYSTEM_CONFIG, 0, opcode::VOLUME_MAPPING);

pub const ALL_KEYS: &[EventKey] = &[
    THREAD_START,
    THREAD_STOP,
    THREAD_DC_START,
    THREAD_DC_STOP,
    PROCESS_START,
    PROCESS_STOP,
    PROCESS_DC_START,
    FILE_NAME,
    FILE_CREATE,
    FILE_DELETE,
    FILE_RUNDOWN,
    DISK_READ,
    DISK_WRITE,
    SYSTEM_PATHS,
    VOLUME_MAPPING,
];

/// Human-readable shape name, for display and filtering.
pub fn shape_name(key: EventKey) -> Option<&'static str> {
    Some(match key {
        THREAD_START => "Thread/Start",
        THREAD_STOP => "Thread/Stop",
        THREAD_DC_START => "Thread/DCStart",
        THREAD_DC_STOP => "Thread/DCStop",
        PROCESS_START => "Process/Start",
        PROCESS_STOP => "Process/Stop",
        PROCESS_DC_START => "Process/DCStart",
        FILE_NAME => "File/Name",
        FILE_CREATE => "File/Create",
        FILE_DELETE => "File/Delete",
        FILE_RUNDOWN => "File/Rundown",
        DISK_READ => "Disk/ReadComplete",
        DISK_WRITE => "Disk/WriteComplete",
        SYSTEM_PATHS => "SystemConfig/SystemPaths",
        VOLUME_MAPPING => "SystemConfig/VolumeMapping",
        _ => return None,
    })
}

// Thread lifetime payload: pid, tid, then seven stack/entry-point pointers
// and the subprocess tag. v3 appended the four priority bytes.
pub const THREAD_LAYOUT: LayoutTable = LayoutTable::new(
    "Thread",
    &[
        VersionLayout {
            version: 2,
            len32: 40,
            pointer_fields: 7,
            variable_tail: false,
        },
        VersionLayout {
            version: 3,
            len32: 44,
            pointer_fields: 7,
            variable_tail: false,
        },
    ],
);

// Process payload: unique key pointer, pid, parent pid, session, exit
// status, directory table base pointer, then image name (utf-8) and
// command line (utf-16).
pub const PROCESS_LAYOUT: LayoutTable = LayoutTable::new(
    "Process",
    &[VersionLayout {
        version: 3,
        len32: 24,
        pointer_fields: 2,
        variable_tail: true,
    }],
);

// File naming payload: the file key pointer followed by the full kernel
// path, null terminated.
pub const FILE_LAYOUT: LayoutTable = LayoutTable::new(
    "File",
    &[VersionLayout {
        version: 2,
        len32: 4,
        pointer_fields: 1,
        variable_tail: true,
    }],
);

// Disk completion payload.
pub const DISK_LAYOUT: LayoutTable = LayoutTable::new(
    "Disk",
    &[VersionLayout {
        version: 2,
        len32: 40,
        pointer_fields: 2,
        variable_tail: false,
    }],
);

// Two null-terminated utf-16 strings: kernel prefix, user prefix.
pub const VOLUME_MAPPING_LAYOUT: LayoutTable = LayoutTable::new(
    "VolumeMapping",
    &[VersionLayout {
        version: 2,
        len32: 4,
        pointer_fields: 0,
        variable_tail: true,
    }],
);

// One null-terminated utf-16 string: the system directory.
pub const SYSTEM_PATHS_LAYOUT: LayoutTable = LayoutTable::new(
    "SystemPaths",
    &[VersionLayout {
        version: 2,
        len32: 2,
        pointer_fields: 0,
        variable_tail: true,
    }],
);

pub struct ThreadInfo {
    pub process_id: i32,
    pub thread_id: i32,
}

pub fn decode_thread(rec: &RawRecord) -> Result<ThreadInfo, DecodeError> {
    THREAD_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let c = rec.cursor();
    Ok(ThreadInfo {
        process_id: c.read_i32(0),
        thread_id: c.read_i32(4),
    })
}

pub struct ProcessInfo {
    pub process_id: i32,
    pub parent_id: i32,
    pub session_id: u32,
    pub exit_status: i32,
    pub image_name: String,
    pub command_line: String,
}

pub fn decode_process(rec: &RawRecord) -> Result<ProcessInfo, DecodeError> {
    PROCESS_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let c = rec.cursor();
    let strings = c.host_offset(24, 2);
    let (image_name, consumed) = c.read_utf8_string(strings);
    let (command_line, _) = c.read_utf16_string(strings + consumed);
    Ok(ProcessInfo {
        process_id: c.read_i32(c.host_offset(4, 1)),
        parent_id: c.read_i32(c.host_offset(8, 1)),
        session_id: c.read_u32(c.host_offset(12, 1)),
        exit_status: c.read_i32(c.host_offset(16, 1)),
        image_name,
        command_line,
    })
}

pub struct FileInfo {
    pub file_key: u64,
    pub name: String,
}

pub fn decode_file_name(rec: &RawRecord) -> Result<FileInfo, DecodeError> {
    FILE_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let c = rec.cursor();
    let (name, _) = c.read_utf16_string(c.host_offset(4, 1));
    Ok(FileInfo {
        file_key: c.read_address(0),
        name,
    })
}

pub struct DiskIoInfo {
    pub disk_number: u32,
    pub transfer_size: u32,
    pub byte_offset: u64,
    pub file_key: u64,
    pub elapsed_qpc: u64,
}

pub fn decode_disk_io(rec: &RawRecord) -> Result<DiskIoInfo, DecodeError> {
    DISK_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let c = rec.cursor();
    Ok(DiskIoInfo {
        disk_number: c.read_u32(0),
        transfer_size: c.read_u32(8),
        byte_offset: c.read_u64(16),
        file_key: c.read_address(24),
        elapsed_qpc: c.read_u64(c.host_offset(32, 2)),
    })
}

pub struct VolumeMappingInfo {
    pub kernel_path: String,
    pub user_path: String,
}

pub fn decode_volume_mapping(rec: &RawRecord) -> Result<VolumeMappingInfo, DecodeError> {
    VOLUME_MAPPING_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let c = rec.cursor();
    let (kernel_path, consumed) = c.read_utf16_string(0);
    let (user_path, _) = c.read_utf16_string(consumed);
    Ok(VolumeMappingInfo {
        kernel_path,
        user_path,
    })
}

pub struct SystemPathsInfo {
    pub system_directory: String,
}

pub fn decode_system_paths(rec: &RawRecord) -> Result<SystemPathsInfo, DecodeError> {
    SYSTEM_PATHS_LAYOUT.validate(rec.version, rec.pointer_width, rec.payload.len())?;
    let (system_directory, _) = rec.cursor().read_utf16_string(0);
    Ok(SystemPathsInfo { system_directory })
}

/// Identity fixups for the shapes above. Thread and process lifetime
/// records are logged on the thread that performed the operation, not the
/// one they describe; stops carry the dying entity only in the payload.
/// Which Start-type shapes keep the reporter aside is shape-specific and
/// validated against real captures; this table is the one place to amend.
pub fn install_kernel_fixups(fixups: &mut FixupPipeline) {
    for key in [THREAD_START, THREAD_DC_START] {
        fixups.register(
            key,
            IdentityFixup::PayloadPreservingReporter {
                thread: Some(FieldRule::at(4)),
                process: Some(FieldRule::at(0)),
            },
        );
    }
    for key in [THREAD_STOP, THREAD_DC_STOP] {
        fixups.register(
            key,
            IdentityFixup::Payload {
                thread: Some(FieldRule::at(4)),
                process: Some(FieldRule::at(0)),
            },
        );
    }
    for key in [PROCESS_START, PROCESS_DC_START] {
        fixups.register(
            key,
            IdentityFixup::PayloadPreservingReporter {
                thread: None,
                process: Some(FieldRule::after_pointers(4, 1)),
            },
        );
    }
    fixups.register(
        PROCESS_STOP,
        IdentityFixup::Payload {
            thread: None,
            process: Some(FieldRule::after_pointers(4, 1)),
        },
    );
}
