//! # Human-Readable Formatting
//!
//! Byte counts in decimal storage units and ls-style mode strings for
//! listings and log messages.

/// Format a byte count in a human readable form (1kB = 1000B, as usual for
/// storage devices these days).
pub fn nice_bytes(value: u64) -> String {
    const EXPONENTS: &[&str] = &["", "k", "M", "G", "T", "P", "E", "Z", "Y"];
    let mut value = value as f64;
    let mut exp = 0;
    while value >= 1000.0 && exp < EXPONENTS.len() - 1 {
        value /= 1000.0;
        exp += 1;
    }
    format!("{:.3}{}B", value, EXPONENTS[exp])
}

/// Render `st_mode` the way `ls -l` does: a file-type character followed by
/// three permission triplets including setuid/setgid/sticky notation.
pub fn mode_chars(mode: u32) -> String {
    let type_char = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFSOCK as u32 => 's',
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);

    let bit = |set: bool, c: char| if set { c } else { '-' };
    out.push(bit(mode & 0o400 != 0, 'r'));
    out.push(bit(mode & 0o200 != 0, 'w'));
    out.push(match (mode & 0o100 != 0, mode & 0o4000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });
    out.push(bit(mode & 0o040 != 0, 'r'));
    out.push(bit(mode & 0o020 != 0, 'w'));
    out.push(match (mode & 0o010 != 0, mode & 0o2000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });
    out.push(bit(mode & 0o004 != 0, 'r'));
    out.push(bit(mode & 0o002 != 0, 'w'));
    out.push(match (mode & 0o001 != 0, mode & 0o1000 != 0) {
        (true, true) => 't',
        (false, true) => 'T',
        (true, false) => 'x',
        (false, false) => '-',
    });
    out
}
