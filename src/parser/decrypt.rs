//! Encrypted Workbook Module
//!
//! パスワード保護されたワークブック（ECMA-376 Agile Encryption）を復号する。
//! 暗号化されたXLSXはOLE複合ファイルとして保存され、`EncryptionInfo`ストリームに
//! 鍵情報（XML）、`EncryptedPackage`ストリームに暗号化されたZIPパッケージが格納されます。
//!
//! 対応範囲はSHA-512とAES-CBCの組み合わせ（Excel 2010以降の既定値）のみです。

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::XlsxDigestError;
use crate::security::SecurityConfig;

/// OLE複合ファイルのシグネチャ
const CFB_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const ENCRYPTION_INFO_STREAM: &str = "/EncryptionInfo";
const ENCRYPTED_PACKAGE_STREAM: &str = "/EncryptedPackage";

/// パスワード検証・鍵復号用のブロックキー（MS-OFFCRYPTO 2.3.4.13）
const BLOCK_KEY_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_KEY_VERIFIER_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_ENCRYPTED_KEY: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];

/// `EncryptedPackage`のセグメント長
const SEGMENT_SIZE: usize = 4096;

/// AESのブロック長
const AES_BLOCK_SIZE: usize = 16;

/// SHA-512のダイジェスト長
const SHA512_SIZE: usize = 64;

/// 暗号化コンテナから取り出した2つのストリーム
pub(crate) struct EncryptedContainer {
    info: Vec<u8>,
    package: Vec<u8>,
}

/// 入力が暗号化コンテナであればストリームを取り出す
///
/// OLE複合ファイルでない場合、または暗号化ストリームを持たない場合
/// （レガシーな.xlsなど）は`None`を返し、通常の解析に委ねます。
pub(crate) fn open_encrypted_container(
    bytes: &[u8],
) -> Result<Option<EncryptedContainer>, XlsxDigestError> {
    if bytes.len() < CFB_SIGNATURE.len() || bytes[..CFB_SIGNATURE.len()] != CFB_SIGNATURE {
        return Ok(None);
    }

    let mut compound = match cfb::CompoundFile::open(Cursor::new(bytes)) {
        Ok(compound) => compound,
        // 壊れた複合ファイルの診断はcalamineに任せる
        Err(_) => return Ok(None),
    };

    if !compound.exists(ENCRYPTION_INFO_STREAM) || !compound.exists(ENCRYPTED_PACKAGE_STREAM) {
        return Ok(None);
    }

    let info = read_stream(&mut compound, ENCRYPTION_INFO_STREAM)?;
    let package = read_stream(&mut compound, ENCRYPTED_PACKAGE_STREAM)?;

    Ok(Some(EncryptedContainer { info, package }))
}

fn read_stream<F: Read + Seek>(
    compound: &mut cfb::CompoundFile<F>,
    path: &str,
) -> Result<Vec<u8>, XlsxDigestError> {
    let mut stream = compound.open_stream(path).map_err(|e| {
        XlsxDigestError::Decryption(format!("cannot read stream '{}': {}", path, e))
    })?;
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;
    Ok(buffer)
}

impl EncryptedContainer {
    /// パスワードで復号し、平文のワークブックパッケージを返す
    pub fn decrypt(
        &self,
        password: &str,
        security: &SecurityConfig,
    ) -> Result<Vec<u8>, XlsxDigestError> {
        let info = AgileEncryptionInfo::parse(&self.info)?;
        security.check_spin_count(info.password.spin_count)?;

        debug!(
            spin_count = info.password.spin_count,
            key_bits = info.key_data.key_bits,
            "Decrypting agile-encrypted workbook"
        );

        let secret_key = info.password.unlock(password, info.key_data.key_bits / 8)?;
        decrypt_package(&self.package, &secret_key, &info.key_data, security)
    }
}

/// `<keyData>`要素（パッケージ本体の暗号化パラメータ）
#[derive(Debug, Clone)]
struct KeyData {
    salt: Vec<u8>,
    block_size: usize,
    key_bits: usize,
}

/// パスワード鍵暗号化子（`<p:encryptedKey>`要素）
#[derive(Debug, Clone)]
struct PasswordKeyEncryptor {
    spin_count: u32,
    salt: Vec<u8>,
    block_size: usize,
    key_bits: usize,
    hash_size: usize,
    encrypted_verifier_hash_input: Vec<u8>,
    encrypted_verifier_hash_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
}

/// `EncryptionInfo`ストリームの内容
#[derive(Debug, Clone)]
struct AgileEncryptionInfo {
    key_data: KeyData,
    password: PasswordKeyEncryptor,
}

impl AgileEncryptionInfo {
    /// `EncryptionInfo`ストリームを解析
    ///
    /// 先頭8バイトはバージョン（major, minor）と予約フラグ、以降がXML記述子です。
    fn parse(stream: &[u8]) -> Result<Self, XlsxDigestError> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        if stream.len() < 8 {
            return Err(XlsxDigestError::Decryption(
                "EncryptionInfo stream is truncated".to_string(),
            ));
        }

        let major = u16::from_le_bytes([stream[0], stream[1]]);
        let minor = u16::from_le_bytes([stream[2], stream[3]]);
        if (major, minor) != (4, 4) {
            return Err(XlsxDigestError::Decryption(format!(
                "unsupported encryption version {}.{} (only Agile Encryption is supported)",
                major, minor
            )));
        }

        let mut xml_reader = Reader::from_reader(&stream[8..]);
        xml_reader.trim_text(true);

        let mut buf = Vec::new();
        let mut key_data = None;
        let mut password = None;
        let mut in_password_encryptor = false;

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let local_name = e.local_name();
                    match local_name.as_ref() {
                        b"keyData" => {
                            let attrs = collect_attributes(&e)?;
                            check_algorithms(&attrs)?;
                            key_data = Some(KeyData {
                                salt: base64_attr(&attrs, "saltValue")?,
                                block_size: number_attr(&attrs, "blockSize")?,
                                key_bits: number_attr(&attrs, "keyBits")?,
                            });
                        }
                        b"keyEncryptor" => {
                            let attrs = collect_attributes(&e)?;
                            // 証明書による鍵暗号化子は対象外
                            in_password_encryptor = attrs
                                .get("uri")
                                .map(|uri| uri.ends_with("/password"))
                                .unwrap_or(false);
                        }
                        b"encryptedKey" if in_password_encryptor && password.is_none() => {
                            let attrs = collect_attributes(&e)?;
                            check_algorithms(&attrs)?;
                            password = Some(PasswordKeyEncryptor {
                                spin_count: number_attr(&attrs, "spinCount")?,
                                salt: base64_attr(&attrs, "saltValue")?,
                                block_size: number_attr(&attrs, "blockSize")?,
                                key_bits: number_attr(&attrs, "keyBits")?,
                                hash_size: number_attr(&attrs, "hashSize")?,
                                encrypted_verifier_hash_input: base64_attr(
                                    &attrs,
                                    "encryptedVerifierHashInput",
                                )?,
                                encrypted_verifier_hash_value: base64_attr(
                                    &attrs,
                                    "encryptedVerifierHashValue",
                                )?,
                                encrypted_key_value: base64_attr(&attrs, "encryptedKeyValue")?,
                            });
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"keyEncryptor" {
                        in_password_encryptor = false;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(XlsxDigestError::Decryption(format!(
                        "EncryptionInfo XML parse error: {}",
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        let key_data = key_data.ok_or_else(|| {
            XlsxDigestError::Decryption("EncryptionInfo has no keyData element".to_string())
        })?;
        let password = password.ok_or_else(|| {
            XlsxDigestError::Decryption(
                "EncryptionInfo has no password key encryptor".to_string(),
            )
        })?;

        if key_data.block_size != AES_BLOCK_SIZE || password.block_size != AES_BLOCK_SIZE {
            return Err(XlsxDigestError::Decryption(format!(
                "unsupported cipher block size {}",
                key_data.block_size
            )));
        }

        Ok(Self { key_data, password })
    }
}

impl PasswordKeyEncryptor {
    /// パスワードを検証し、パッケージ復号用の秘密鍵を取り出す
    fn unlock(&self, password: &str, secret_len: usize) -> Result<Vec<u8>, XlsxDigestError> {
        let key_len = self.key_bits / 8;
        let iv = fit(self.salt.clone(), self.block_size);
        let hash = iterated_password_hash(password, &self.salt, self.spin_count);

        let verifier_input = aes_cbc_decrypt(
            &derive_key(&hash, &BLOCK_KEY_VERIFIER_INPUT, key_len),
            &iv,
            &self.encrypted_verifier_hash_input,
        )?;
        let verifier_input = &verifier_input[..self.salt.len().min(verifier_input.len())];
        let expected = Sha512::digest(verifier_input);

        let verifier_value = aes_cbc_decrypt(
            &derive_key(&hash, &BLOCK_KEY_VERIFIER_VALUE, key_len),
            &iv,
            &self.encrypted_verifier_hash_value,
        )?;

        let hash_size = self.hash_size.min(SHA512_SIZE);
        if verifier_value.len() < hash_size || expected[..hash_size] != verifier_value[..hash_size]
        {
            return Err(XlsxDigestError::Decryption(
                "the password is incorrect".to_string(),
            ));
        }

        let mut secret = aes_cbc_decrypt(
            &derive_key(&hash, &BLOCK_KEY_ENCRYPTED_KEY, key_len),
            &iv,
            &self.encrypted_key_value,
        )?;
        if secret.len() < secret_len {
            return Err(XlsxDigestError::Decryption(
                "encrypted key value is shorter than the key size".to_string(),
            ));
        }
        secret.truncate(secret_len);
        Ok(secret)
    }
}

/// `EncryptedPackage`ストリームを復号
///
/// 先頭8バイトは平文サイズ（u64 LE）。以降は4096バイトのセグメントごとに、
/// `SHA-512(keyData.salt || セグメント番号)`をIVとしてAES-CBCで暗号化されています。
fn decrypt_package(
    package: &[u8],
    secret_key: &[u8],
    key_data: &KeyData,
    security: &SecurityConfig,
) -> Result<Vec<u8>, XlsxDigestError> {
    if package.len() < 8 {
        return Err(XlsxDigestError::Decryption(
            "EncryptedPackage stream is truncated".to_string(),
        ));
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&package[..8]);
    let size = u64::from_le_bytes(size_bytes);
    security.check_decrypted_size(size)?;

    // 暗号文より大きな平文は存在しないため、確保前に拒否する
    let payload = package.len() - 8;
    if size > payload as u64 {
        return Err(XlsxDigestError::Decryption(format!(
            "EncryptedPackage holds {} bytes but declares {}",
            payload, size
        )));
    }

    let size = size as usize;
    let mut plain = Vec::with_capacity(size);

    for (segment, chunk) in package[8..].chunks(SEGMENT_SIZE).enumerate() {
        if plain.len() >= size {
            break;
        }
        let iv = fit(
            Sha512::new()
                .chain_update(&key_data.salt)
                .chain_update((segment as u32).to_le_bytes())
                .finalize()
                .to_vec(),
            key_data.block_size,
        );
        let usable = chunk.len() - chunk.len() % key_data.block_size;
        plain.extend(aes_cbc_decrypt(secret_key, &iv, &chunk[..usable])?);
    }

    if plain.len() < size {
        return Err(XlsxDigestError::Decryption(format!(
            "EncryptedPackage holds {} bytes but declares {}",
            plain.len(),
            size
        )));
    }
    plain.truncate(size);
    Ok(plain)
}

/// H0 = SHA-512(salt || password)、Hn = SHA-512(iterator || Hn-1)
fn iterated_password_hash(password: &str, salt: &[u8], spin_count: u32) -> Vec<u8> {
    let password_bytes: Vec<u8> = password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();

    let mut hash = Sha512::new()
        .chain_update(salt)
        .chain_update(&password_bytes)
        .finalize()
        .to_vec();

    for iterator in 0..spin_count {
        hash = Sha512::new()
            .chain_update(iterator.to_le_bytes())
            .chain_update(&hash)
            .finalize()
            .to_vec();
    }
    hash
}

/// SHA-512(H || blockKey)を鍵長に合わせる
fn derive_key(hash: &[u8], block_key: &[u8], key_len: usize) -> Vec<u8> {
    fit(
        Sha512::new()
            .chain_update(hash)
            .chain_update(block_key)
            .finalize()
            .to_vec(),
        key_len,
    )
}

/// 指定長に切り詰め、不足分は0x36で埋める
fn fit(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, 0x36);
    bytes
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, XlsxDigestError> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(XlsxDigestError::Decryption(format!(
            "ciphertext length {} is not a multiple of the block size",
            data.len()
        )));
    }

    let invalid_length = |_| XlsxDigestError::Decryption("invalid AES key or IV length".to_string());
    let mut buffer = data.to_vec();
    let result = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map(|_| ()),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map(|_| ()),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map(|_| ()),
        other => {
            return Err(XlsxDigestError::Decryption(format!(
                "unsupported AES key length {} bytes",
                other
            )))
        }
    };
    result.map_err(|_| XlsxDigestError::Decryption("AES decryption failed".to_string()))?;
    Ok(buffer)
}

fn collect_attributes(
    element: &quick_xml::events::BytesStart<'_>,
) -> Result<HashMap<String, String>, XlsxDigestError> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| {
            XlsxDigestError::Decryption(format!("EncryptionInfo attribute error: {}", e))
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = std::str::from_utf8(&attr.value)
            .map_err(|e| XlsxDigestError::Decryption(format!("non UTF-8 attribute: {}", e)))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn required_attr<'a>(
    attrs: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, XlsxDigestError> {
    attrs.get(name).map(String::as_str).ok_or_else(|| {
        XlsxDigestError::Decryption(format!("EncryptionInfo is missing attribute '{}'", name))
    })
}

fn number_attr<T: std::str::FromStr>(
    attrs: &HashMap<String, String>,
    name: &str,
) -> Result<T, XlsxDigestError> {
    let raw = required_attr(attrs, name)?;
    raw.trim().parse().map_err(|_| {
        XlsxDigestError::Decryption(format!("attribute '{}' is not a number: {}", name, raw))
    })
}

fn base64_attr(attrs: &HashMap<String, String>, name: &str) -> Result<Vec<u8>, XlsxDigestError> {
    let raw = required_attr(attrs, name)?;
    STANDARD.decode(raw.trim()).map_err(|e| {
        XlsxDigestError::Decryption(format!("attribute '{}' is not valid base64: {}", name, e))
    })
}

fn check_algorithms(attrs: &HashMap<String, String>) -> Result<(), XlsxDigestError> {
    let cipher = required_attr(attrs, "cipherAlgorithm")?;
    let chaining = required_attr(attrs, "cipherChaining")?;
    let hash = required_attr(attrs, "hashAlgorithm")?;
    if cipher != "AES" || chaining != "ChainingModeCBC" || hash != "SHA512" {
        return Err(XlsxDigestError::Decryption(format!(
            "unsupported encryption algorithms: {} / {} / {}",
            cipher, chaining, hash
        )));
    }
    Ok(())
}
