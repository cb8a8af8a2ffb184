//! Kernel entry point. Three boot paths, one per architecture this
//! kernel targets (spec.md's Data Model: i686/x86_64/aarch64) -- each
//! translates whatever the platform hands it into the portable
//! `&[MemoryRegion]` + kernel-end `PAddr` that [`helios_kernel::bootstrap::run`]
//! expects, then never returns.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use helios_kernel::mm::frame::MemoryRegion;
use helios_kernel::mm::PAddr;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    loop {
        core::hint::spin_loop();
    }
}

/// Linker-provided end of the kernel's loaded image (`.bss` end in the
/// linker script); everything past it is free for the PMM to manage.
extern "C" {
    static __kernel_end: u8;
}

fn kernel_end() -> PAddr {
    // SAFETY: `__kernel_end` is a linker symbol, not a real static --
    // only its address is ever read.
    PAddr::new(unsafe { &__kernel_end as *const u8 as u64 })
}

#[cfg(target_arch = "x86_64")]
mod boot {
    use bootloader_api::config::Mapping;
    use bootloader_api::info::MemoryRegionKind;
    use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

    use super::{kernel_end, MemoryRegion};
    use helios_kernel::mm::PAddr;

    static CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(kernel_main, config = &CONFIG);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        let mut regions = [MemoryRegion {
            start: PAddr::new(0),
            end: PAddr::new(0),
            available: false,
        }; 64];
        let mut count = 0;
        for region in boot_info.memory_regions.iter() {
            if count == regions.len() {
                break;
            }
            regions[count] = MemoryRegion {
                start: PAddr::new(region.start),
                end: PAddr::new(region.end),
                available: region.kind == MemoryRegionKind::Usable,
            };
            count += 1;
        }
        helios_kernel::bootstrap::run(&regions[..count], kernel_end());
    }
}

/// Neither i686 nor aarch64 pulls in a boot-info crate (see `kernel/Cargo.toml`
/// -- only x86_64 carries `bootloader_api`); both report a single
/// conservative usable region and rely on the PMM's own reserved-range
/// bookkeeping to avoid stepping on device memory. A real deployment would
/// teach these paths multiboot2 / a UEFI memory map, but this kernel has
/// no hardware target that requires it yet.
#[cfg(any(target_arch = "x86", target_arch = "aarch64"))]
mod boot {
    use super::{kernel_end, MemoryRegion};
    use helios_kernel::mm::PAddr;

    const CONSERVATIVE_RAM_END: u64 = 128 * 1024 * 1024; // 128 MiB

    fn single_region() -> [MemoryRegion; 1] {
        [MemoryRegion {
            start: PAddr::new(0),
            end: PAddr::new(CONSERVATIVE_RAM_END),
            available: true,
        }]
    }

    #[cfg(target_arch = "x86")]
    #[no_mangle]
    pub extern "C" fn _start() -> ! {
        let regions = single_region();
        helios_kernel::bootstrap::run(&regions, kernel_end());
    }

    #[cfg(target_arch = "aarch64")]
    #[no_mangle]
    pub extern "C" fn _start() -> ! {
        let regions = single_region();
        helios_kernel::bootstrap::run(&regions, kernel_end());
    }
}
