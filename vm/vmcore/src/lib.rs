// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core VM infrastructure shared by device models.

#![forbid(unsafe_code)]

pub mod save_restore;
