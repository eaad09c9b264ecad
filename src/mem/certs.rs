//! Local certificate storage the TLS files are provisioned from.

use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateError {
    NotFound,
    TooLarge { size: usize, capacity: usize },
    Io,
}

/// Read access to locally stored certificate files.
///
/// `read` fills `buf` with the whole file and returns its length. An
/// implementation backed by a filesystem opens and closes the file inside
/// the call, on every path.
pub trait CertificateSource {
    fn read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, CertificateError>;
}

impl<C: CertificateSource + ?Sized> CertificateSource for &mut C {
    fn read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, CertificateError> {
        (**self).read(path, buf)
    }
}

/// Certificates compiled into flash, e.g. with `include_bytes!`.
#[derive(Debug, Clone, Copy)]
pub struct StaticCertificates<'a> {
    files: &'a [(&'a str, &'a [u8])],
}

impl<'a> StaticCertificates<'a> {
    pub const fn new(files: &'a [(&'a str, &'a [u8])]) -> Self {
        Self { files }
    }
}

impl CertificateSource for StaticCertificates<'_> {
    fn read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, CertificateError> {
        let (_, data) = self
            .files
            .iter()
            .find(|(name, _)| *name == path)
            .ok_or(CertificateError::NotFound)?;
        if data.len() > buf.len() {
            error!(
                "[file] {path} is {} bytes, buffer holds {}",
                data.len(),
                buf.len()
            );
            return Err(CertificateError::TooLarge {
                size: data.len(),
                capacity: buf.len(),
            });
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}
