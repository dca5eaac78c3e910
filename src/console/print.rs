//! Console print macros.
//!
//! Output goes to the console sink the embedding kernel installs with
//! [`set_sink`]. Until then it is dropped.

use core::fmt::{self, Write};

use lazyinit::LazyInit;

use crate::hal::spin::Mutex;

/// Console output routine, e.g. a UART `puts`.
pub type ConsoleSink = fn(&str);

static PRINT_LOCK: Mutex<()> = Mutex::new(());

static SINK: LazyInit<ConsoleSink> = LazyInit::new();

/// Installs the console sink. Only the first call takes effect.
///
/// Returns `false` if a sink was already installed.
pub fn set_sink(sink: ConsoleSink) -> bool {
    let _guard = PRINT_LOCK.lock();
    if SINK.is_inited() {
        return false;
    }
    SINK.init_once(sink);
    true
}

/// Bytes collected before a line (or a piece of one) goes to the sink.
const LINE_BUFFER_SIZE: usize = 512;

/// Collects formatted output and hands it to the sink in as few calls as
/// possible. A chunk never ends inside a UTF-8 sequence.
struct LineBuffer {
    sink: ConsoleSink,
    bytes: [u8; LINE_BUFFER_SIZE],
    len: usize,
}

impl LineBuffer {
    const fn new(sink: ConsoleSink) -> Self {
        Self {
            sink,
            bytes: [0; LINE_BUFFER_SIZE],
            len: 0,
        }
    }

    fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        // Safety: only whole `str` prefixes ending on a char boundary are copied in.
        let chunk = unsafe { core::str::from_utf8_unchecked(&self.bytes[..self.len]) };
        (self.sink)(chunk);
        self.len = 0;
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, mut s: &str) -> fmt::Result {
        while !s.is_empty() {
            let room = LINE_BUFFER_SIZE - self.len;
            let mut take = s.len().min(room);
            while !s.is_char_boundary(take) {
                take -= 1;
            }
            if take == 0 {
                // The next char does not fit behind what is buffered.
                self.flush();
                continue;
            }
            self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
            self.len += take;
            s = &s[take..];
        }
        Ok(())
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        self.flush();
    }
}

pub fn _print(args: fmt::Arguments) {
    let Some(&sink) = SINK.get() else {
        return;
    };
    // One writer at a time, so lines from different CPUs stay whole.
    let _guard = PRINT_LOCK.lock();
    let mut line = LineBuffer::new(sink);
    let _ = line.write_fmt(args);
}

/// Simple console print operation.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        $crate::console::print::_print(format_args!($($arg)*))
    });
}

/// Simple console print operation with newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
