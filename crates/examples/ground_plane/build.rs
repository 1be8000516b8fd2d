use std::io;
use std::path::Path;
use std::process::{Command, Output};

const SPV_DIR: &str = "../../../spv";

fn main() -> io::Result<()> {
    // Tell the build script to only run again if we change our source shaders
    println!("cargo:rerun-if-changed=shaders");

    std::fs::create_dir_all(SPV_DIR)?;

    for entry in std::fs::read_dir("shaders")? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let in_path = entry.path();
        let out_path = Path::new(SPV_DIR).join(format!("{}.spv", entry.file_name().to_string_lossy()));
        let result = Command::new("glslc")
            .arg(&in_path)
            .args(["--target-env=vulkan1.3", "-o"])
            .arg(&out_path)
            .output();

        if !handle_program_result(&in_path, result) {
            // No compiler: previously compiled binaries in spv/ are used as they are.
            break;
        }
    }

    Ok(())
}

/// Returns false when glslc is not installed.
fn handle_program_result(in_path: &Path, result: io::Result<Output>) -> bool {
    match result {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            eprint!("stdout: {}", String::from_utf8_lossy(&output.stdout));
            eprint!("stderr: {}", String::from_utf8_lossy(&output.stderr));
            panic!(
                "Failed to compile shader {}. Status: {}",
                in_path.display(),
                output.status
            );
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            println!("cargo:warning=glslc not found, shaders in {SPV_DIR} were not rebuilt");
            false
        }
        Err(error) => panic!("Failed to compile shader {}. Cause: {}", in_path.display(), error),
    }
}
