use anyhow::Result;

/// Reinterprets SPIR-V bytes as words; byte order follows the magic number.
pub fn read_shader_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(ash::util::read_spv(&mut cursor)?)
}
