// Управление ключами
// Генерация, хранение и ротация identity и prekeys

use crate::crypto::handshake::x3dh::PublicKeyBundle;
use crate::crypto::master_key::{seal_key_material, unseal_key_material, SealedKeyMaterial};
use crate::crypto::CryptoProvider;
use crate::error::{EngineError, Result, StoreError};
use crate::storage::models::{StoredKeyMaterial, StoredOneTimePrekey, StoredSignedPrekey};
use crate::storage::IdentityStorage;
use crate::utils::{fingerprint, time::current_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Долговременная identity: ключ подписи и ключ согласования (разные типы ключей)
pub struct IdentityKeyPair<P: CryptoProvider> {
    signing_private: P::SignaturePrivateKey,
    signing_public: P::SignaturePublicKey,
    agreement_private: P::AgreementPrivateKey,
    agreement_public: P::AgreementPublicKey,
}

impl<P: CryptoProvider> IdentityKeyPair<P> {
    fn generate() -> Result<Self> {
        let (signing_private, signing_public) = P::generate_signature_keys()?;
        let (agreement_private, agreement_public) = P::generate_agreement_keys()?;
        Ok(Self {
            signing_private,
            signing_public,
            agreement_private,
            agreement_public,
        })
    }

    fn from_private_bytes(signing: Vec<u8>, agreement: Vec<u8>) -> Result<Self> {
        let signing_private = P::signature_private_key_from_bytes(signing)?;
        let signing_public = P::signature_public_from_private(&signing_private)?;
        let agreement_private = P::agreement_private_key_from_bytes(agreement)?;
        let agreement_public = P::agreement_public_from_private(&agreement_private)?;
        Ok(Self {
            signing_private,
            signing_public,
            agreement_private,
            agreement_public,
        })
    }

    pub fn signing_public(&self) -> &P::SignaturePublicKey {
        &self.signing_public
    }

    pub fn agreement_public(&self) -> &P::AgreementPublicKey {
        &self.agreement_public
    }

    pub(crate) fn agreement_private(&self) -> &P::AgreementPrivateKey {
        &self.agreement_private
    }
}

impl<P: CryptoProvider> fmt::Debug for IdentityKeyPair<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("signing", &fingerprint(self.signing_public.as_ref()))
            .field("agreement", &fingerprint(self.agreement_public.as_ref()))
            .finish_non_exhaustive()
    }
}

/// Signed prekey с метаданными
pub struct SignedPrekey<P: CryptoProvider> {
    pub id: u32,
    private_key: P::AgreementPrivateKey,
    pub public_key: P::AgreementPublicKey,
    pub signature: Vec<u8>,
    pub created_at: i64,
}

impl<P: CryptoProvider> SignedPrekey<P> {
    pub fn public_view(&self) -> SignedPrekeyPublic {
        SignedPrekeyPublic {
            id: self.id,
            public_key: self.public_key.as_ref().to_vec(),
            signature: self.signature.clone(),
            created_at: self.created_at,
        }
    }
}

/// Одноразовый prekey
pub struct OneTimePrekey<P: CryptoProvider> {
    pub id: u32,
    private_key: P::AgreementPrivateKey,
    pub public_key: P::AgreementPublicKey,
}

/// Публичная часть signed prekey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPrekeyPublic {
    pub id: u32,
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub signature: Vec<u8>,
    pub created_at: i64,
}

/// Публичная часть one-time prekey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePrekeyPublic {
    pub id: u32,
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub public_key: Vec<u8>,
}

/// Хранилище ключей локальной identity
///
/// Приватный материал не покидает этот тип (кроме как через `IdentityStorage`
/// и `seal_identity`). После каждой мутации состояние сохраняется.
pub struct KeyStore<P: CryptoProvider> {
    identity: Option<IdentityKeyPair<P>>,

    /// Текущий signed prekey
    signed_prekey: Option<SignedPrekey<P>>,

    /// Вытесненные signed prekeys, живут `prekey_retention_secs`
    previous_signed_prekeys: HashMap<u32, SignedPrekey<P>>,

    /// Пул one-time prekeys, упорядочен по id
    one_time_prekeys: BTreeMap<u32, OneTimePrekey<P>>,

    /// Израсходованные id, повторно не принимаются
    consumed_one_time_prekeys: BTreeSet<u32>,

    next_signed_prekey_id: u32,
    next_one_time_prekey_id: u32,

    prekey_retention_secs: i64,
    storage: Arc<dyn IdentityStorage>,
}

impl<P: CryptoProvider> KeyStore<P> {
    pub fn new(storage: Arc<dyn IdentityStorage>, prekey_retention_secs: i64) -> Self {
        Self {
            identity: None,
            signed_prekey: None,
            previous_signed_prekeys: HashMap::new(),
            one_time_prekeys: BTreeMap::new(),
            consumed_one_time_prekeys: BTreeSet::new(),
            next_signed_prekey_id: 1,
            next_one_time_prekey_id: 1,
            prekey_retention_secs,
            storage,
        }
    }

    /// Создать новую identity.
    ///
    /// Заменяет существующую: все prekeys старой identity удаляются, счётчики id
    /// продолжают расти.
    pub fn generate_identity(&mut self) -> Result<&IdentityKeyPair<P>> {
        use tracing::info;

        let identity = IdentityKeyPair::<P>::generate()?;
        info!(
            target: "crypto::keys",
            signing = %fingerprint(identity.signing_public.as_ref()),
            agreement = %fingerprint(identity.agreement_public.as_ref()),
            "Generated new identity"
        );

        self.signed_prekey = None;
        self.previous_signed_prekeys.clear();
        self.one_time_prekeys.clear();
        self.identity = Some(identity);
        self.persist()?;

        self.identity()
    }

    /// Сгенерировать новый signed prekey и `count` one-time prekeys.
    ///
    /// Предыдущий signed prekey (если был) уходит в grace-период, как при ротации.
    pub fn generate_prekey_material(
        &mut self,
        count: u32,
    ) -> Result<(SignedPrekeyPublic, Vec<OneTimePrekeyPublic>)> {
        let signed = self.install_new_signed_prekey()?;
        let one_time = self.generate_one_time_prekeys(count)?;
        self.persist()?;
        Ok((signed, one_time))
    }

    /// Загрузить ранее сохранённую identity. Никогда не генерирует новую.
    pub fn load_identity(&mut self) -> Result<Option<&IdentityKeyPair<P>>> {
        use tracing::debug;

        let Some(material) = self.storage.load_identity()? else {
            debug!(target: "crypto::keys", "No persisted identity");
            return Ok(None);
        };
        self.restore_from(&material)?;

        debug!(
            target: "crypto::keys",
            one_time_prekeys = self.one_time_prekeys.len(),
            consumed = self.consumed_one_time_prekeys.len(),
            "Loaded persisted identity"
        );
        Ok(self.identity.as_ref())
    }

    pub fn identity(&self) -> Result<&IdentityKeyPair<P>> {
        self.identity.as_ref().ok_or(EngineError::NoIdentityLoaded)
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Экспортировать публичный bundle.
    ///
    /// С `include_one_time_prekey` добавляется prekey с наименьшим id из пула
    /// (если пул не пуст). Ключ не изымается: он будет израсходован, когда
    /// придёт первое сообщение под ним.
    pub fn export_public_bundle(&self, include_one_time_prekey: bool) -> Result<PublicKeyBundle> {
        let identity = self.identity()?;
        let signed = self
            .signed_prekey
            .as_ref()
            .ok_or_else(|| EngineError::UnknownPrekey("no signed prekey generated".to_string()))?;

        let one_time_prekey = if include_one_time_prekey {
            self.one_time_prekeys.values().next().map(|otpk| OneTimePrekeyPublic {
                id: otpk.id,
                public_key: otpk.public_key.as_ref().to_vec(),
            })
        } else {
            None
        };

        Ok(PublicKeyBundle {
            suite_id: P::suite_id(),
            identity_signing_key: identity.signing_public.as_ref().to_vec(),
            identity_agreement_key: identity.agreement_public.as_ref().to_vec(),
            signed_prekey_id: signed.id,
            signed_prekey: signed.public_key.as_ref().to_vec(),
            signed_prekey_signature: signed.signature.clone(),
            one_time_prekey,
        })
    }

    /// Все доступные one-time prekeys (для публикации в directory)
    pub fn one_time_prekeys_public(&self) -> Vec<OneTimePrekeyPublic> {
        self.one_time_prekeys
            .values()
            .map(|otpk| OneTimePrekeyPublic {
                id: otpk.id,
                public_key: otpk.public_key.as_ref().to_vec(),
            })
            .collect()
    }

    /// Ротация signed prekey
    pub fn rotate_signed_prekey(&mut self) -> Result<SignedPrekeyPublic> {
        let signed = self.install_new_signed_prekey()?;
        self.persist()?;
        Ok(signed)
    }

    /// Дополнить пул one-time prekeys до `target`. Возвращает только новые ключи.
    pub fn replenish_one_time_prekeys(&mut self, target: u32) -> Result<Vec<OneTimePrekeyPublic>> {
        let current = u32::try_from(self.one_time_prekeys.len()).unwrap_or(u32::MAX);
        if current >= target {
            return Ok(Vec::new());
        }
        let fresh = self.generate_one_time_prekeys(target - current)?;
        self.persist()?;
        Ok(fresh)
    }

    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    pub fn current_signed_prekey(&self) -> Option<SignedPrekeyPublic> {
        self.signed_prekey.as_ref().map(SignedPrekey::public_view)
    }

    /// Приватный signed prekey по id: текущий или ещё не истёкший предыдущий
    pub(crate) fn signed_prekey_private(&self, id: u32) -> Result<&P::AgreementPrivateKey> {
        if let Some(current) = self.signed_prekey.as_ref().filter(|spk| spk.id == id) {
            return Ok(&current.private_key);
        }
        self.previous_signed_prekeys
            .get(&id)
            .map(|spk| &spk.private_key)
            .ok_or_else(|| EngineError::UnknownPrekey(format!("signed prekey {}", id)))
    }

    /// Приватный one-time prekey по id; израсходованный или неизвестный → `UnknownPrekey`
    pub(crate) fn one_time_prekey_private(&self, id: u32) -> Result<&P::AgreementPrivateKey> {
        if self.consumed_one_time_prekeys.contains(&id) {
            return Err(EngineError::UnknownPrekey(format!("one-time prekey {} already consumed", id)));
        }
        self.one_time_prekeys
            .get(&id)
            .map(|otpk| &otpk.private_key)
            .ok_or_else(|| EngineError::UnknownPrekey(format!("one-time prekey {}", id)))
    }

    /// Израсходовать one-time prekey. Вызывается только после того, как первое
    /// сообщение под ним прошло аутентификацию.
    pub(crate) fn consume_one_time_prekey(&mut self, id: u32) -> Result<()> {
        use tracing::debug;

        let Some(prekey) = self.one_time_prekeys.remove(&id) else {
            return Err(EngineError::UnknownPrekey(format!("one-time prekey {}", id)));
        };
        self.consumed_one_time_prekeys.insert(id);

        // Не сохранилось: prekey возвращается, повторная доставка пройдёт заново
        if let Err(e) = self.persist() {
            self.consumed_one_time_prekeys.remove(&id);
            self.one_time_prekeys.insert(id, prekey);
            return Err(e);
        }

        debug!(
            target: "crypto::keys",
            prekey_id = id,
            remaining = self.one_time_prekeys.len(),
            "Consumed one-time prekey"
        );
        Ok(())
    }

    /// Зашифровать весь приватный материал паролем
    pub fn seal_identity(
        &self,
        password: &str,
        salt_length: usize,
        iterations: u32,
    ) -> Result<SealedKeyMaterial> {
        let material = self.to_stored()?;
        Ok(seal_key_material(&material, password, salt_length, iterations)?)
    }

    /// Восстановить материал из зашифрованного пакета и сохранить его
    pub fn unseal_identity(&mut self, sealed: &SealedKeyMaterial, password: &str) -> Result<()> {
        let material = unseal_key_material(sealed, password)?;
        self.restore_from(&material)?;
        self.persist()
    }

    // === Внутреннее ===

    fn install_new_signed_prekey(&mut self) -> Result<SignedPrekeyPublic> {
        use tracing::debug;

        let identity = self.identity()?;
        let (private_key, public_key) = P::generate_agreement_keys()?;
        let signature = P::sign(&identity.signing_private, public_key.as_ref())?;

        let id = self.next_signed_prekey_id;
        self.next_signed_prekey_id = id.checked_add(1).ok_or_else(|| {
            EngineError::Crypto(crate::error::CryptoError::KeyGenerationError(
                "signed prekey id space exhausted".to_string(),
            ))
        })?;

        let fresh = SignedPrekey {
            id,
            private_key,
            public_key,
            signature,
            created_at: current_timestamp(),
        };
        let view = fresh.public_view();

        // Сохраняем старый prekey в историю
        if let Some(old) = self.signed_prekey.replace(fresh) {
            self.previous_signed_prekeys.insert(old.id, old);
        }
        self.cleanup_old_prekeys();

        debug!(
            target: "crypto::keys",
            prekey_id = id,
            prekey = %fingerprint(&view.public_key),
            retained = self.previous_signed_prekeys.len(),
            "Installed new signed prekey"
        );
        Ok(view)
    }

    fn generate_one_time_prekeys(&mut self, count: u32) -> Result<Vec<OneTimePrekeyPublic>> {
        use tracing::debug;

        self.identity()?;
        let mut fresh = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (private_key, public_key) = P::generate_agreement_keys()?;
            let id = self.next_one_time_prekey_id;
            self.next_one_time_prekey_id = id.checked_add(1).ok_or_else(|| {
                EngineError::Crypto(crate::error::CryptoError::KeyGenerationError(
                    "one-time prekey id space exhausted".to_string(),
                ))
            })?;

            fresh.push(OneTimePrekeyPublic {
                id,
                public_key: public_key.as_ref().to_vec(),
            });
            self.one_time_prekeys.insert(
                id,
                OneTimePrekey {
                    id,
                    private_key,
                    public_key,
                },
            );
        }

        debug!(
            target: "crypto::keys",
            generated = count,
            pool = self.one_time_prekeys.len(),
            "Generated one-time prekeys"
        );
        Ok(fresh)
    }

    /// Очистка вытесненных prekeys старше периода хранения
    fn cleanup_old_prekeys(&mut self) {
        let now = current_timestamp();
        let retention = self.prekey_retention_secs;
        self.previous_signed_prekeys
            .retain(|_, prekey| now - prekey.created_at < retention);
    }

    fn persist(&self) -> Result<()> {
        let material = self.to_stored()?;
        self.storage.save_identity(&material)?;
        Ok(())
    }

    fn to_stored(&self) -> Result<StoredKeyMaterial> {
        let identity = self.identity()?;
        let stored_spk = |spk: &SignedPrekey<P>| StoredSignedPrekey {
            id: spk.id,
            private_key: spk.private_key.as_ref().to_vec(),
            signature: spk.signature.clone(),
            created_at: spk.created_at,
        };

        let mut previous: Vec<StoredSignedPrekey> =
            self.previous_signed_prekeys.values().map(stored_spk).collect();
        previous.sort_by_key(|spk| spk.id);

        Ok(StoredKeyMaterial {
            suite_id: P::suite_id(),
            identity_signing_private: identity.signing_private.as_ref().to_vec(),
            identity_agreement_private: identity.agreement_private.as_ref().to_vec(),
            signed_prekey: self.signed_prekey.as_ref().map(stored_spk),
            previous_signed_prekeys: previous,
            one_time_prekeys: self
                .one_time_prekeys
                .values()
                .map(|otpk| StoredOneTimePrekey {
                    id: otpk.id,
                    private_key: otpk.private_key.as_ref().to_vec(),
                })
                .collect(),
            consumed_one_time_prekeys: self.consumed_one_time_prekeys.iter().copied().collect(),
            next_signed_prekey_id: self.next_signed_prekey_id,
            next_one_time_prekey_id: self.next_one_time_prekey_id,
        })
    }

    fn restore_from(&mut self, material: &StoredKeyMaterial) -> Result<()> {
        if material.suite_id != P::suite_id() {
            return Err(StoreError::Corrupted(format!(
                "stored identity uses suite {}, expected {}",
                material.suite_id,
                P::suite_id()
            ))
            .into());
        }

        let identity = IdentityKeyPair::<P>::from_private_bytes(
            material.identity_signing_private.clone(),
            material.identity_agreement_private.clone(),
        )?;

        let restore_spk = |stored: &StoredSignedPrekey| -> Result<SignedPrekey<P>> {
            let private_key = P::agreement_private_key_from_bytes(stored.private_key.clone())?;
            let public_key = P::agreement_public_from_private(&private_key)?;
            Ok(SignedPrekey {
                id: stored.id,
                private_key,
                public_key,
                signature: stored.signature.clone(),
                created_at: stored.created_at,
            })
        };

        let signed_prekey = material.signed_prekey.as_ref().map(restore_spk).transpose()?;
        let mut previous_signed_prekeys = HashMap::new();
        for stored in &material.previous_signed_prekeys {
            previous_signed_prekeys.insert(stored.id, restore_spk(stored)?);
        }

        let mut one_time_prekeys = BTreeMap::new();
        for stored in &material.one_time_prekeys {
            let private_key = P::agreement_private_key_from_bytes(stored.private_key.clone())?;
            let public_key = P::agreement_public_from_private(&private_key)?;
            one_time_prekeys.insert(
                stored.id,
                OneTimePrekey {
                    id: stored.id,
                    private_key,
                    public_key,
                },
            );
        }

        // Всё разобрано без ошибок, теперь заменяем состояние целиком
        self.identity = Some(identity);
        self.signed_prekey = signed_prekey;
        self.previous_signed_prekeys = previous_signed_prekeys;
        self.one_time_prekeys = one_time_prekeys;
        self.consumed_one_time_prekeys = material.consumed_one_time_prekeys.iter().copied().collect();
        self.next_signed_prekey_id = material.next_signed_prekey_id;
        self.next_one_time_prekey_id = material.next_one_time_prekey_id;
        Ok(())
    }
}
