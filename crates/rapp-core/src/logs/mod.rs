// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod formatter;
pub mod layer;
pub mod record;
pub mod shipper;

pub use formatter::Formatter;
pub use layer::ShipperLayer;
pub use record::{LogRecord, Severity};
pub use shipper::{LogSender, LogShipper, CONSOLE_TARGET};
