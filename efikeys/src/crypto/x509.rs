// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{extension, X509Extension, X509Name, X509},
};
use thiserror::Error;

/// Bits of randomness in generated serial numbers
const SERIAL_BITS: i32 = 127;

#[derive(Error, Debug)]
pub enum CertificateBuilderError {
    /// Error getting ASN.1 Time from days from now
    #[error("failed to get ASN.1 Time for {days} day(s) from now")]
    ASN1TimeDaysFromNowError {
        days: u32,
        source: openssl::error::ErrorStack,
    },

    /// X509 certificate builder error
    #[error("X509 certificate builder error: {message}")]
    BuilderError {
        message: String,
        source: openssl::error::ErrorStack,
    },

    /// Failed to get public key from the private key
    #[error("failed to get public key from the private key")]
    PubkeyFromPrivError { source: crate::crypto::CryptoError },

    /// Common name not set on CertificateBuilder
    #[error("Common Name not set on CertificateBuilder. Set the common name with the common_name() method from the CertificateBuilder object")]
    MissingCommonNameError,

    /// Private key not set on CertificateBuilder
    #[error("Private key not set on CertificateBuilder. Set the private key with the private_key() method from the CertificateBuilder object")]
    MissingPrivateKeyError,

    /// Error creating X509 Name
    #[error("Error creating X509 Name: {message}")]
    NameBuilderError {
        message: String,
        source: openssl::error::ErrorStack,
    },
}

fn builder_error(
    message: &str,
) -> impl FnOnce(openssl::error::ErrorStack) -> CertificateBuilderError {
    let message = message.to_string();
    move |source| CertificateBuilderError::BuilderError { message, source }
}

/// Builder for self-signed Secure Boot key certificates
#[derive(Default)]
pub struct CertificateBuilder<'a> {
    common_name: Option<&'a str>,
    extensions: Option<Vec<X509Extension>>,
    hash_algorithm: Option<MessageDigest>,
    not_after: Option<u32>,
    not_before: Option<u32>,
    private_key: Option<&'a PKey<Private>>,
    serial: Option<u32>,
}

impl<'a> CertificateBuilder<'a> {
    /// Create a new CertificateBuilder object
    pub fn new() -> CertificateBuilder<'a> {
        CertificateBuilder::default()
    }

    /// Set the subject and issuer Common Name
    pub fn common_name(
        &'a mut self,
        cn: &'a str,
    ) -> &'a mut CertificateBuilder<'a> {
        self.common_name = Some(cn);
        self
    }

    /// Set the hash algorithm used to sign the certificate, SHA-256 when
    /// unset
    pub fn hash_algorithm(
        &'a mut self,
        hash_algorithm: MessageDigest,
    ) -> &'a mut CertificateBuilder<'a> {
        self.hash_algorithm = Some(hash_algorithm);
        self
    }

    /// Set the certificate start of validity, in days from now
    pub fn not_before(
        &'a mut self,
        days_from_now: u32,
    ) -> &'a mut CertificateBuilder<'a> {
        self.not_before = Some(days_from_now);
        self
    }

    /// Set the certificate expiration date, in days from now.
    ///
    /// Firmware does not check validity periods, so the default is ten years.
    pub fn not_after(
        &'a mut self,
        days_from_now: u32,
    ) -> &'a mut CertificateBuilder<'a> {
        self.not_after = Some(days_from_now);
        self
    }

    /// Set the private key associated with the certificate
    pub fn private_key(
        &'a mut self,
        private_key: &'a PKey<Private>,
    ) -> &'a mut CertificateBuilder<'a> {
        self.private_key = Some(private_key);
        self
    }

    /// Use a fixed serial number instead of a random one
    pub fn serial(
        &'a mut self,
        serial: u32,
    ) -> &'a mut CertificateBuilder<'a> {
        self.serial = Some(serial);
        self
    }

    /// Set additional extensions to include in the certificate
    pub fn add_extensions(
        &'a mut self,
        extensions: Vec<X509Extension>,
    ) -> &'a mut CertificateBuilder<'a> {
        match &mut self.extensions {
            None => {
                self.extensions = Some(extensions);
            }
            Some(v) => v.extend(extensions),
        }
        self
    }

    fn serial_number(&self) -> Result<Asn1Integer, CertificateBuilderError> {
        let bn = match self.serial {
            Some(s) => BigNum::from_u32(s)
                .map_err(builder_error("failed to encode serial number"))?,
            None => {
                let mut bn = BigNum::new().map_err(builder_error(
                    "failed to allocate serial number",
                ))?;
                bn.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false).map_err(
                    builder_error("failed to generate random serial number"),
                )?;
                bn
            }
        };
        bn.to_asn1_integer()
            .map_err(builder_error("failed to encode serial number"))
    }

    /// Generate the certificate using the previously set options
    pub fn build(&'a mut self) -> Result<X509, CertificateBuilderError> {
        let cn = self
            .common_name
            .ok_or(CertificateBuilderError::MissingCommonNameError)?;
        let private_key = self
            .private_key
            .ok_or(CertificateBuilderError::MissingPrivateKeyError)?;

        let mut name_builder = X509Name::builder().map_err(|source| {
            CertificateBuilderError::NameBuilderError {
                message: "failed to create X509 Name object".into(),
                source,
            }
        })?;
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, cn)
            .map_err(|source| CertificateBuilderError::NameBuilderError {
                message: "failed to set Common Name in Name builder".into(),
                source,
            })?;
        let name = name_builder.build();

        let mut builder = X509::builder().map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to create X509 certificate builder object"
                    .into(),
                source,
            }
        })?;

        // X.509 version 3
        builder.set_version(2).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate version".into(),
                source,
            }
        })?;

        let serial = self.serial_number()?;
        builder.set_serial_number(&serial).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate serial number".into(),
                source,
            }
        })?;

        builder.set_subject_name(&name).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate subject name".into(),
                source,
            }
        })?;

        // Self-signed certificate, the issuer is the same as the subject
        builder.set_issuer_name(&name).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 issuer name".into(),
                source,
            }
        })?;

        let not_before = self.not_before.unwrap_or(0);
        let valid_from =
            Asn1Time::days_from_now(not_before).map_err(|source| {
                CertificateBuilderError::ASN1TimeDaysFromNowError {
                    days: not_before,
                    source,
                }
            })?;
        builder.set_not_before(&valid_from).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate Not Before date"
                    .into(),
                source,
            }
        })?;

        let not_after = self.not_after.unwrap_or(3650);
        let valid_to =
            Asn1Time::days_from_now(not_after).map_err(|source| {
                CertificateBuilderError::ASN1TimeDaysFromNowError {
                    days: not_after,
                    source,
                }
            })?;
        builder.set_not_after(&valid_to).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate Not After date"
                    .into(),
                source,
            }
        })?;

        let pubkey = crate::crypto::pkey_pub_from_priv(private_key)
            .map_err(|source| CertificateBuilderError::PubkeyFromPrivError {
                source,
            })?;
        builder.set_pubkey(&pubkey).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to set X509 certificate public key".into(),
                source,
            }
        })?;

        let ski = extension::SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(|source| CertificateBuilderError::BuilderError {
                message: "failed to build Subject Key Identifier".into(),
                source,
            })?;
        builder.append_extension(ski).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to append Subject Key Identifier extension"
                    .into(),
                source,
            }
        })?;

        if let Some(extensions) = self.extensions.take() {
            for ext in extensions {
                builder.append_extension(ext).map_err(|source| {
                    CertificateBuilderError::BuilderError {
                        message: "failed to append X509 certificate extension"
                            .into(),
                        source,
                    }
                })?;
            }
        }

        let h = self.hash_algorithm.unwrap_or(MessageDigest::sha256());
        builder.sign(private_key, h).map_err(|source| {
            CertificateBuilderError::BuilderError {
                message: "failed to sign X509 certificate".into(),
                source,
            }
        })?;

        Ok(builder.build())
    }
}
