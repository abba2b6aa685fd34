//! Boot the built ISO under QEMU with UEFI firmware.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::environment::BuildLayout;
use crate::image::find_iso;
use crate::process::{Cmd, CommandRunner};

/// Size of the scratch install disk.
pub const TEST_DISK_SIZE: &str = "15G";

/// Find OVMF firmware for UEFI boot
pub fn find_ovmf() -> Option<PathBuf> {
    let candidates = [
        // Arch
        "/usr/share/ovmf/x64/OVMF_CODE.fd",
        "/usr/share/edk2/x64/OVMF_CODE.4m.fd",
        "/usr/share/edk2-ovmf/x64/OVMF_CODE.fd",
        // Fedora/Debian
        "/usr/share/edk2/ovmf/OVMF_CODE.fd",
        "/usr/share/OVMF/OVMF_CODE.fd",
    ];

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Create the scratch disk unless it already exists.
pub fn ensure_test_disk(runner: &dyn CommandRunner, layout: &BuildLayout) -> Result<PathBuf> {
    let disk = layout.test_disk();
    if !disk.exists() {
        println!("Creating {} virtual disk...", TEST_DISK_SIZE);
        Cmd::new("qemu-img")
            .args(["create", "-f", "qcow2"])
            .arg_path(&disk)
            .arg(TEST_DISK_SIZE)
            .error_msg("qemu-img create failed. Is QEMU installed?")
            .run_with(runner)?;
    }
    Ok(disk)
}

/// The QEMU invocation: the fresh ISO boots first, the scratch disk second.
pub fn boot_command(iso: &Path, disk: &Path, ovmf: Option<&Path>) -> Cmd {
    let mut cmd = Cmd::new("qemu-system-x86_64")
        .args(["-cpu", "host", "-enable-kvm", "-machine", "q35,accel=kvm", "-m", "8192"]);

    if let Some(code) = ovmf {
        cmd = cmd
            .arg("-drive")
            .arg(format!("if=pflash,format=raw,readonly=on,file={}", code.display()));
    }

    cmd.args([
        "-device",
        "virtio-scsi-pci,bus=pcie.0,id=scsi0",
        "-device",
        "scsi-hd,drive=hdd0,bus=scsi0.0,id=scsi0.0,bootindex=2",
        "-drive",
    ])
    .arg(format!(
        "file={},if=none,format=qcow2,discard=unmap,aio=native,cache=none,id=hdd0",
        disk.display()
    ))
    .args([
        "-device",
        "virtio-scsi-pci,bus=pcie.0,id=scsi1",
        "-device",
        "scsi-cd,drive=cdrom0,bus=scsi1.0,bootindex=1",
        "-drive",
    ])
    .arg(format!(
        "file={},media=cdrom,if=none,format=raw,cache=none,id=cdrom0",
        iso.display()
    ))
    .args(["-nic", "none"])
}

/// Run the newest ISO in the build directory.
pub fn run_iso(runner: &dyn CommandRunner, layout: &BuildLayout) -> Result<()> {
    let Some(iso) = find_iso(&layout.out_dir())? else {
        bail!(
            "No ISO found in {}. Run 'archoffline build' first.",
            layout.out_dir().display()
        );
    };

    let disk = ensure_test_disk(runner, layout)?;
    let ovmf = find_ovmf();

    println!("Running ISO in QEMU...");
    println!("  ISO:  {}", iso.display());
    println!("  Disk: {} ({})", disk.display(), TEST_DISK_SIZE);
    match &ovmf {
        Some(path) => println!("  Boot: UEFI ({})", path.display()),
        None => println!("  Boot: BIOS (OVMF not found, install edk2-ovmf for UEFI)"),
    }

    boot_command(&iso, &disk, ovmf.as_deref())
        .stream(true)
        .error_msg("QEMU exited with an error")
        .run_with(runner)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_command_boots_iso_first() {
        let cmd = boot_command(
            Path::new("/b/out/arch.iso"),
            Path::new("/b/test.qcow2"),
            Some(Path::new("/ovmf/OVMF_CODE.fd")),
        );
        assert_eq!(cmd.program(), "qemu-system-x86_64");
        let args = cmd.get_args().join(" ");
        assert!(args.contains("if=pflash,format=raw,readonly=on,file=/ovmf/OVMF_CODE.fd"));
        assert!(args.contains("scsi-cd,drive=cdrom0,bus=scsi1.0,bootindex=1"));
        assert!(args.contains("scsi-hd,drive=hdd0,bus=scsi0.0,id=scsi0.0,bootindex=2"));
        assert!(args.ends_with("-nic none"));
    }

    #[test]
    fn test_boot_command_without_firmware() {
        let cmd = boot_command(Path::new("/i.iso"), Path::new("/d.qcow2"), None);
        assert!(!cmd.get_args().iter().any(|a| a.contains("pflash")));
    }
}
