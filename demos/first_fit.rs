use std::io::Read;

use firstfit::{Address, Allocator, GrowthProvider, SbrkProvider};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    SbrkProvider::program_break(),
  );
}

fn print_alloc(
  allocator: &Allocator<SbrkProvider>,
  requested: usize,
  address: Address,
) {
  println!(
    "Allocated {} bytes ({} usable), offset = {:#x}, address = {:?}, program break = {:?}",
    requested,
    allocator.usable_size(address),
    address.offset(),
    allocator.payload(address).as_ptr(),
    SbrkProvider::program_break(),
  );
}

fn print_heap(allocator: &Allocator<SbrkProvider>) {
  print!("{}", allocator.dump());
  println!("{:?}", allocator.stats());
}

fn main() -> firstfit::Result<()> {
  env_logger::init();

  // The system allocator also grows the heap with brk. Steer it to mmap so
  // our region stays contiguous while this demo prints.
  #[cfg(all(target_os = "linux", target_env = "gnu"))]
  unsafe {
    libc::mallopt(libc::M_MMAP_THRESHOLD, 0);
  }

  let mut allocator = Allocator::new(SbrkProvider::new());

  print_program_break("start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three blocks of 64 bytes, appended one after another.
  // --------------------------------------------------------------------
  println!("\n[1] Allocate A, B and C (64 bytes each)");
  let mut blocks = Vec::new();
  for _ in 0..3 {
    if let Some(address) = allocator.alloc(64)? {
      print_alloc(&allocator, 64, address);
      blocks.push(address);
    }
  }
  let (a, b, c) = (blocks[0], blocks[1], blocks[2]);

  allocator.payload_mut(a).fill(0xAA);
  allocator.payload_mut(c).fill(0xCC);
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free A and allocate 40 bytes: first fit reuses A's slot whole,
  //    since splitting would leave no room for another header.
  // --------------------------------------------------------------------
  allocator.free(a);
  println!("\n[2] Freed A, allocate 40 bytes");
  if let Some(address) = allocator.alloc(40)? {
    print_alloc(&allocator, 40, address);
    println!("[2] reused A? {}", address == a);
    allocator.free(address);
  }
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Allocate 16 bytes from A's 64-byte slot: the block is split and
  //    the remainder stays free.
  // --------------------------------------------------------------------
  println!("\n[3] Allocate 16 bytes (split A)");
  let small = allocator.alloc(16)?;
  if let Some(address) = small {
    print_alloc(&allocator, 16, address);
  }
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Free everything: the freed blocks merge with their free neighbours
  //    until a single free block covers the heap.
  // --------------------------------------------------------------------
  println!("\n[4] Free C, B and the small block");
  allocator.free(c);
  allocator.free(b);
  if let Some(address) = small {
    allocator.free(address);
  }
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) A request larger than the free block grows the heap at its end.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");

  let large = 64 * 1024;
  println!("\n[5] Allocate a 64 KiB block");
  if let Some(address) = allocator.alloc(large)? {
    print_alloc(&allocator, large, address);
  }
  print_program_break("after large alloc");
  println!("heap bytes = {}", allocator.provider().bytes().len());

  if let Err(corruption) = allocator.check() {
    println!("heap check failed: {}", corruption);
  }

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) init hands the region back to the program break.
  // --------------------------------------------------------------------
  allocator.init()?;
  println!("\n[6] Reinitialized, heap size = {}", allocator.heap_size());
  print_program_break("end");

  Ok(())
}
