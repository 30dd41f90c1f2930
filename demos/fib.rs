//! Smoke-test driver for [`mmalloc::Heap`]: a memoized Fibonacci recurrence
//! over a buffer that grows by `realloc`. Exercises malloc/realloc/free
//! under repeated resizing; not part of the crate's contract (spec §1
//! excludes this driver from the tested surface).
//!
//! Reads integers from stdin, one per line, and prints the memoized
//! Fibonacci number for each.

use std::io::{self, BufRead};

use mmalloc::Heap;

struct Memo {
  heap: Heap,
  buffer: *mut i64,
  capacity: usize,
  computed: usize,
}

impl Memo {
  fn new() -> Self {
    let mut heap = Heap::new();
    let capacity = 2usize;
    let buffer = unsafe { heap.calloc(capacity, std::mem::size_of::<i64>()) } as *mut i64;

    unsafe {
      buffer.write(0);
      buffer.add(1).write(1);
    }

    Self {
      heap,
      buffer,
      capacity,
      computed: 2,
    }
  }

  fn ensure_capacity(&mut self, index: usize) {
    if index < self.capacity {
      return;
    }

    let new_capacity = 2 * index + 1;
    self.buffer = unsafe {
      self
        .heap
        .reallocarray(self.buffer as *mut u8, new_capacity, std::mem::size_of::<i64>())
    } as *mut i64;
    self.capacity = new_capacity;
  }

  fn get(&mut self, n: usize) -> i64 {
    while self.computed <= n {
      self.ensure_capacity(self.computed);
      let value = unsafe { *self.buffer.add(self.computed - 1) + *self.buffer.add(self.computed - 2) };
      unsafe { self.buffer.add(self.computed).write(value) };
      self.computed += 1;
    }

    unsafe { *self.buffer.add(n) }
  }
}

impl Drop for Memo {
  fn drop(&mut self) {
    unsafe { self.heap.free(self.buffer as *mut u8) };
  }
}

fn main() {
  env_logger::init();

  let mut memo = Memo::new();
  let stdin = io::stdin();

  for line in stdin.lock().lines() {
    let Ok(line) = line else { break };
    let Ok(n) = line.trim().parse::<usize>() else { continue };

    println!("Memoized Fibonacci ({n}): {}", memo.get(n));
  }
}
