/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Diesel schema for the signature result table.
//!
//! Timestamps are stored as RFC 3339 text so the same table definition serves
//! both PostgreSQL and SQLite.

diesel::table! {
    signature_records (record_key) {
        record_key -> Text,
        correlation_id -> Text,
        state -> Text,
        location -> Nullable<Text>,
        error -> Nullable<Text>,
        updated_at -> Text,
    }
}
