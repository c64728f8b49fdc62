// On-disk and in-memory file type tag, shared by the inode table and the
// on-disk DINode. Kept as an explicit 2-byte discriminant so its layout
// matches the on-disk inode format exactly.
#[repr(i16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(non_camel_case_types)]
pub enum FileType {
    NO_TYPE = 0,
    T_DIR = 1,
    T_FILE = 2,
    T_DEVICE = 3,
}
