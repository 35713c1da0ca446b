// Compiled for every binary, as this is not a workspace

use flatfish::{Config, InodeId};

/// Apply shared source options onto an archive [`Config`]
#[doc(hidden)]
pub fn config_from_args(mapper_block_size: Option<usize>, lru_size: Option<usize>) -> Config {
    let mut config = Config::default();
    if let Some(block_size) = mapper_block_size {
        config.mapper_block_size = block_size;
    }
    if let Some(lru_size) = lru_size {
        config.compression_lru_size = lru_size;
    }
    config
}

/// `ls -l` style mode column, e.g. `drwxr-xr-x`
#[doc(hidden)]
pub fn mode_string(id: InodeId, permissions: u16) -> String {
    let kind = match id.into_base_type() {
        InodeId::BasicDirectory => 'd',
        InodeId::BasicFile => '-',
        InodeId::BasicSymlink => 'l',
        InodeId::BasicBlockDevice => 'b',
        InodeId::BasicCharacterDevice => 'c',
        InodeId::BasicNamedPipe => 'p',
        InodeId::BasicSocket => 's',
        _ => '?',
    };

    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6, 3, 0] {
        let bits = permissions >> shift;
        s.push(if bits & 0b100 != 0 { 'r' } else { '-' });
        s.push(if bits & 0b010 != 0 { 'w' } else { '-' });
        s.push(if bits & 0b001 != 0 { 'x' } else { '-' });
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!(mode_string(InodeId::BasicDirectory, 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(InodeId::ExtendedFile, 0o644), "-rw-r--r--");
        assert_eq!(mode_string(InodeId::BasicSymlink, 0o777), "lrwxrwxrwx");
    }
}
