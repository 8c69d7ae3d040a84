//! Secure Messaging (Double Ratchet)
//!
//! ## Dataflow
//! ```text
//! После успешного X3DH:
//!
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! RatchetState::initiator(SK, InitiatorState)
//!   send chain = KDF_RK(SK, DH(EK_A, SPK_B))
//!   local ratchet key = EK_A
//!
//! engine.encrypt() → envelope
//!   ratchet_public_key = EK_A_pub
//!   prekey = PrekeyHeader { spk id, opk id } →
//!                                            RatchetState::responder(SK, SPK_B)
//!                                            engine.decrypt():
//!                                              новый ratchet key → DH ratchet step
//!                                              receive chain = KDF_RK(SK, DH(SPK_B, EK_A))
//!                                              новая пара, send chain = KDF_RK(RK, DH(new, EK_A))
//!
//! Дальше каждая смена направления = DH ratchet step.
//! ```
//!
//! ## Security Properties
//!
//! ### Forward Secrecy
//! Каждый chain step односторонний; использованный message key удаляется.
//!
//! ### Break-in Recovery
//! После компрометации новый DH ratchet step восстанавливает секретность.
//!
//! ### Out-of-Order Messages
//! Ключи пропущенных сообщений кэшируются (ограниченно по количеству и возрасту).

pub mod double_ratchet;

pub use double_ratchet::{
    RatchetEngine, RatchetState, SerializableRatchetState, SessionInfo, SessionRole,
};
