pub use anyhow::{ensure, format_err, Context as _, Result};
pub use futures::{
    future,
    stream::{self, BoxStream, Stream, StreamExt as _, TryStreamExt as _},
};
pub use itertools::Itertools as _;
pub use log::{info, warn};
pub use ndarray::{s, Array1, Array2, Array3, Array4, Axis};
pub use par_stream::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    io::{self, BufReader, BufWriter, Read as _, Write as _},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
