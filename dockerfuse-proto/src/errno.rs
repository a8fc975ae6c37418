//! Portable errno encoding.
//!
//! Errno numeric values are not portable (see Linux `ENOTEMPTY` vs Darwin
//! `EDESTADDRREQ`), and the host and the satellite may run on different
//! operating systems. Failed operations therefore travel as a transport
//! error whose text is `errno: <SYM>`; each side maps the symbol to its
//! own native value.
//!
//! The literal `EOF` is reserved to signal end-of-stream on reads and is
//! passed through verbatim. Any other text decodes conservatively to `EIO`.

use std::io;

/// Prefix of every errno-encoded wire error.
pub const ERRNO_PREFIX: &str = "errno: ";

/// Reserved wire error signalling end-of-stream (valid only for Read).
pub const EOF_ERROR: &str = "EOF";

macro_rules! errno_symbols {
    ($(($errno:ident, $sym:literal)),+ $(,)?) => {
        /// Map a native errno value to its portable symbol.
        ///
        /// Values outside the symbol set encode as `EIO`.
        pub fn errno_to_sym(errno: i32) -> &'static str {
            // An if-chain rather than a match: several libc constants are
            // aliases of each other on some targets, and a match over them
            // would have unreachable arms.
            $(if errno == libc::$errno {
                return $sym;
            })+
            "EIO"
        }

        /// Map a portable symbol back to the native errno value.
        ///
        /// Unknown symbols decode as `EIO`.
        pub fn sym_to_errno(sym: &str) -> i32 {
            match sym {
                $($sym => libc::$errno,)+
                // Aliases the peer may emit under a different canonical name.
                "EOPNOTSUPP" => libc::EOPNOTSUPP,
                "EWOULDBLOCK" => libc::EWOULDBLOCK,
                _ => libc::EIO,
            }
        }

        #[cfg(test)]
        const SYMBOLS: &[(i32, &str)] = &[$((libc::$errno, $sym)),+];
    };
}

errno_symbols! {
    (E2BIG, "E2BIG"),
    (EACCES, "EACCES"),
    (EADDRINUSE, "EADDRINUSE"),
    (EADDRNOTAVAIL, "EADDRNOTAVAIL"),
    (EAFNOSUPPORT, "EAFNOSUPPORT"),
    (EAGAIN, "EAGAIN"),
    (EALREADY, "EALREADY"),
    (EBADF, "EBADF"),
    (EBADMSG, "EBADMSG"),
    (EBUSY, "EBUSY"),
    (ECANCELED, "ECANCELED"),
    (ECHILD, "ECHILD"),
    (ECONNABORTED, "ECONNABORTED"),
    (ECONNREFUSED, "ECONNREFUSED"),
    (ECONNRESET, "ECONNRESET"),
    (EDEADLK, "EDEADLK"),
    (EDESTADDRREQ, "EDESTADDRREQ"),
    (EDOM, "EDOM"),
    (EDQUOT, "EDQUOT"),
    (EEXIST, "EEXIST"),
    (EFAULT, "EFAULT"),
    (EFBIG, "EFBIG"),
    (EHOSTDOWN, "EHOSTDOWN"),
    (EHOSTUNREACH, "EHOSTUNREACH"),
    (EIDRM, "EIDRM"),
    (EILSEQ, "EILSEQ"),
    (EINPROGRESS, "EINPROGRESS"),
    (EINTR, "EINTR"),
    (EINVAL, "EINVAL"),
    (EIO, "EIO"),
    (EISCONN, "EISCONN"),
    (EISDIR, "EISDIR"),
    (ELOOP, "ELOOP"),
    (EMFILE, "EMFILE"),
    (EMLINK, "EMLINK"),
    (EMSGSIZE, "EMSGSIZE"),
    (EMULTIHOP, "EMULTIHOP"),
    (ENAMETOOLONG, "ENAMETOOLONG"),
    (ENETDOWN, "ENETDOWN"),
    (ENETRESET, "ENETRESET"),
    (ENETUNREACH, "ENETUNREACH"),
    (ENFILE, "ENFILE"),
    (ENOBUFS, "ENOBUFS"),
    (ENODATA, "ENODATA"),
    (ENODEV, "ENODEV"),
    (ENOENT, "ENOENT"),
    (ENOEXEC, "ENOEXEC"),
    (ENOLCK, "ENOLCK"),
    (ENOLINK, "ENOLINK"),
    (ENOMEM, "ENOMEM"),
    (ENOMSG, "ENOMSG"),
    (ENOPROTOOPT, "ENOPROTOOPT"),
    (ENOSPC, "ENOSPC"),
    (ENOSR, "ENOSR"),
    (ENOSTR, "ENOSTR"),
    (ENOSYS, "ENOSYS"),
    (ENOTBLK, "ENOTBLK"),
    (ENOTCONN, "ENOTCONN"),
    (ENOTDIR, "ENOTDIR"),
    (ENOTEMPTY, "ENOTEMPTY"),
    (ENOTRECOVERABLE, "ENOTRECOVERABLE"),
    (ENOTSOCK, "ENOTSOCK"),
    (EOPNOTSUPP, "ENOTSUP"),
    (ENOTTY, "ENOTTY"),
    (ENXIO, "ENXIO"),
    (EOVERFLOW, "EOVERFLOW"),
    (EOWNERDEAD, "EOWNERDEAD"),
    (EPERM, "EPERM"),
    (EPFNOSUPPORT, "EPFNOSUPPORT"),
    (EPIPE, "EPIPE"),
    (EPROTO, "EPROTO"),
    (EPROTONOSUPPORT, "EPROTONOSUPPORT"),
    (EPROTOTYPE, "EPROTOTYPE"),
    (ERANGE, "ERANGE"),
    (EREMOTE, "EREMOTE"),
    (EROFS, "EROFS"),
    (ESHUTDOWN, "ESHUTDOWN"),
    (ESOCKTNOSUPPORT, "ESOCKTNOSUPPORT"),
    (ESPIPE, "ESPIPE"),
    (ESRCH, "ESRCH"),
    (ESTALE, "ESTALE"),
    (ETIME, "ETIME"),
    (ETIMEDOUT, "ETIMEDOUT"),
    (ETOOMANYREFS, "ETOOMANYREFS"),
    (ETXTBSY, "ETXTBSY"),
    (EUSERS, "EUSERS"),
    (EXDEV, "EXDEV"),
}

/// Render a raw errno as the wire error string, e.g. `errno: ENOENT`.
pub fn errno_to_wire(errno: i32) -> String {
    format!("{ERRNO_PREFIX}{}", errno_to_sym(errno))
}

/// Render an I/O error as the wire error string.
///
/// Errors that carry no OS errno (bincode failures, in-memory cursors, ...)
/// encode as `EIO`; the original text is logged so it isn't lost.
pub fn io_error_to_wire(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(errno) => errno_to_wire(errno),
        None => {
            tracing::warn!(error = %err, "non-errno failure, encoding as EIO");
            errno_to_wire(libc::EIO)
        }
    }
}

/// Decode a wire error string back to a native errno.
///
/// Text that does not start with `errno: ` (including the reserved `EOF`,
/// which callers must handle before decoding) is malformed from this
/// layer's point of view and decodes to `EIO`.
pub fn wire_to_errno(message: &str) -> i32 {
    match message.strip_prefix(ERRNO_PREFIX) {
        Some(sym) => sym_to_errno(sym),
        None => {
            tracing::warn!(message, "malformed error from server");
            libc::EIO
        }
    }
}
