// World constants
pub const WORLD_HEIGHT: i32 = 256;
pub const CHUNK_SIZE: i32 = 16;
pub const SECTION_HEIGHT: i32 = 16;
pub const NUM_SECTIONS: i32 = WORLD_HEIGHT / SECTION_HEIGHT;
pub const SECTION_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * SECTION_HEIGHT) as usize;
pub const CHUNK_VOLUME: usize = SECTION_VOLUME * NUM_SECTIONS as usize;
pub const COLUMN_COUNT: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;
pub const SEA_LEVEL: i32 = 62;

// Lighting
pub const MAX_LIGHT: u8 = 15;

// Damage tracking: more distinct edits than this in one sync period
// collapse into a whole-chunk resend.
pub const DAMAGE_THRESHOLD: usize = 176;

// Region file layout
pub const PAGE_SIZE: usize = 4096;
pub const REGION_SIZE: i32 = 32;
pub const REGION_ENTRIES: usize = (REGION_SIZE * REGION_SIZE) as usize;
pub const DIRECTORY_PAGE: u32 = 0;
pub const RESERVED_PAGES: u32 = 2;
pub const MAX_PAGES_PER_ENTRY: usize = u8::MAX as usize;
pub const MAX_START_PAGE: u32 = (1 << 24) - 1;
pub const PAYLOAD_HEADER_SIZE: usize = 5;
pub const REGION_DIR: &str = "region";
pub const REGION_EXTENSION: &str = "mcr";
pub const LEVEL_FILE: &str = "level.ron";

// Persistence tuning
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;
pub const DEFAULT_DIRTY_HIGH_WATER: usize = 1024;
pub const DEFAULT_FLUSH_BURST: usize = 16;
pub const DEFAULT_PIN_RADIUS: i32 = 2;
