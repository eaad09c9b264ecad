//! SSL context configuration and certificate provisioning.

use crate::cfg::modem_cfg::{CertificatePaths, TlsConfig, MAX_CERT_LEN, MAX_SOCKETS};
use crate::mem::certs::CertificateSource;
use crate::modem::command::command;
use crate::modem::error::{Error, Result};
use crate::modem::response::Response;
use crate::modem::{Bg95, Watchdog};
use core::fmt::Write as _;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use heapless::String;
use log::{error, info, warn};
use rand_core::RngCore;

fn quoted(value: &str) -> String<32> {
    let mut text = String::new();
    // Truncated values only affect the error report.
    let _ = write!(text, "\"{value}\"");
    text
}

fn number(value: u8) -> String<32> {
    let mut text = String::new();
    let _ = write!(text, "{value}");
    text
}

fn raw(value: &str) -> String<32> {
    let mut text = String::new();
    let _ = text.push_str(value);
    text
}

impl<'a, S, D, W, K, T, R> Bg95<'a, S, D, W, K, T, R>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
    W: Watchdog,
    K: OutputPin,
    T: InputPin,
    R: RngCore,
{
    /// Sets one `AT+QSSLCFG` parameter on the configured context.
    fn set_tls_parameter(&mut self, context_id: u8, name: &'static str, value: String<32>) -> Result<()> {
        let cmd = command(format_args!("AT+QSSLCFG=\"{name}\",{context_id},{value}"))?;
        match self
            .client
            .send_and_await(&cmd, self.config.command_timeout)?
        {
            Response::Ok { .. } => Ok(()),
            other => {
                error!("[tls] Error setting SSL parameter {name} to {value}: {other:?}");
                Err(Error::TlsParameter { name, value })
            }
        }
    }

    /// Pushes every SSL parameter of `tls` to its context, one at a time.
    /// The first parameter the modem refuses is named in the error.
    pub fn set_tls_context(&mut self, tls: &TlsConfig) -> Result<()> {
        info!("[tls] Configuring SSL context {}", tls.context_id);
        let ctx = tls.context_id;
        self.set_tls_parameter(ctx, "sslversion", number(tls.ssl_version))?;
        self.set_tls_parameter(ctx, "ciphersuite", raw(tls.cipher_suite))?;
        self.set_tls_parameter(ctx, "cacert", quoted(tls.ca_cert_file))?;
        self.set_tls_parameter(ctx, "clientcert", quoted(tls.client_cert_file))?;
        self.set_tls_parameter(ctx, "clientkey", quoted(tls.client_key_file))?;
        self.set_tls_parameter(ctx, "seclevel", number(tls.security_level))?;
        self.set_tls_parameter(ctx, "session", number(u8::from(tls.session_reuse)))?;
        self.set_tls_parameter(ctx, "sni", number(u8::from(tls.sni)))?;
        self.set_tls_parameter(ctx, "checkhost", number(u8::from(tls.check_host)))?;
        self.set_tls_parameter(ctx, "ignorelocaltime", number(u8::from(tls.ignore_local_time)))?;
        self.set_tls_parameter(ctx, "renegotiation", number(u8::from(tls.renegotiation)))?;
        if let Some(version) = tls.dtls_version {
            self.set_tls_parameter(ctx, "dtls", number(1))?;
            self.set_tls_parameter(ctx, "dtlsversion", number(version))?;
        }
        Ok(())
    }

    /// Closes SSL contexts 0..=5. Contexts that are not open answer `ERROR`,
    /// which is ignored.
    pub fn close_ssl_contexts(&mut self) -> Result<()> {
        for ctx in 0..MAX_SOCKETS {
            let cmd = command(format_args!("AT+QSSLCLOSE={ctx}"))?;
            let response = self
                .client
                .send_and_await(&cmd, self.config.ssl_close_timeout)?;
            if response.is_ok() {
                info!("[tls] Closed SSL context {ctx}");
            }
        }
        Ok(())
    }

    /// Replaces the modem's copy of one certificate with the local file at `path`.
    fn sync_certificate<C: CertificateSource>(
        &mut self,
        source: &mut C,
        path: &str,
        file: &'static str,
    ) -> Result<()> {
        if let Err(e) = self.delete_file(file) {
            warn!("[tls] Could not delete {file}: {e}");
        }

        let mut buf = [0u8; MAX_CERT_LEN];
        let len = source.read(path, &mut buf).map_err(|e| {
            error!("[tls] Reading {path} failed: {e:?}");
            Error::CertificateUnavailable { file }
        })?;
        self.upload_file(file, &buf[..len])?;
        Ok(())
    }

    /// Deletes and re-uploads the CA certificate, device certificate and
    /// device key under the file names `tls` refers to.
    ///
    /// A provisioning step, run when the certificates change. The files stay
    /// on the modem across power cycles and sessions only reference them.
    pub fn sync_certificates<C: CertificateSource>(
        &mut self,
        mut source: C,
        paths: &CertificatePaths<'_>,
        tls: &TlsConfig,
    ) -> Result<()> {
        info!("[tls] Uploading CA certificate");
        self.sync_certificate(&mut source, paths.ca_cert, tls.ca_cert_file)?;
        info!("[tls] Uploading device certificate");
        self.sync_certificate(&mut source, paths.device_cert, tls.client_cert_file)?;
        info!("[tls] Uploading device private key");
        self.sync_certificate(&mut source, paths.device_key, tls.client_key_file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_values_render_as_sent() {
        assert_eq!(quoted("cacert.pem"), "\"cacert.pem\"");
        assert_eq!(number(4), "4");
        assert_eq!(raw("0XFFFF"), "0XFFFF");
    }
}
