// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::{error, fmt, io};

/// Errors raised while building or reconfiguring proxy-owned resources:
/// instances, pools, listeners, and the on-disk config file.
#[derive(Debug)]
pub enum CreationError {
    InvalidResource(String),
    AlreadyExists(String),
    InvalidAddress(String),
    Io(io::Error),
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationError::InvalidResource(s) => write!(f, "invalid resource: {}", s),
            CreationError::AlreadyExists(s) => write!(f, "already exists: {}", s),
            CreationError::InvalidAddress(s) => write!(f, "invalid address: {}", s),
            CreationError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl error::Error for CreationError {}

impl From<io::Error> for CreationError {
    fn from(e: io::Error) -> Self {
        CreationError::Io(e)
    }
}
