//! `mqbridge-middleware` – the two buses the bridge engine sits between.
//!
//! Routes raw deliveries between the robotics topic bus and the messaging
//! broker without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – the [`TopicBus`] seam and [`LocalTopicBus`], an in-process
//!   implementation built on Tokio broadcast channels.
//! - [`broker`] – the [`BrokerClient`] seam, [`LocalBroker`], and
//!   [`PrivatePath`] resolution of `~/` topics.
//! - [`codec`] – JSON / MessagePack payload [`Codec`].

pub mod broker;
pub mod bus;
pub mod codec;

pub use broker::{BrokerClient, BrokerMessage, LocalBroker, PayloadHandler, PrivatePath};
pub use bus::{LocalTopicBus, MessageHandler, TopicBus};
pub use codec::Codec;
